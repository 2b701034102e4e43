extern crate rcu_lookup_bench;

use rcu_lookup_bench::affinity;
use rcu_lookup_bench::cancel::CancellationToken;
use rcu_lookup_bench::config::{BoundedConfig, KeyMode, UnboundedConfig};
use rcu_lookup_bench::error::{AffinityError, BenchError, ValidationError};
use rcu_lookup_bench::run;
use rcu_lookup_bench::table::Backend;
use std::thread;
use std::time::{Duration, Instant};

/// Up to `max` cores this process may run on, or `None` if there are fewer than `min`.
fn cores(min: usize, max: usize) -> Option<Vec<usize>> {
    let cores = affinity::available_cores().ok()?;
    if cores.len() < min {
        println!("skipped: fewer than {} cores available", min);
        return None;
    }
    Some(cores.iter().copied().take(max).collect())
}

/// `(total, misses, hits)` of every group on a `read:` line.
fn parse_read_line(line: &str) -> Vec<(u64, u64, u64)> {
    let rest = line.strip_prefix("read: ").unwrap();
    let nums: Vec<u64> = rest
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().unwrap())
        .collect();
    assert_eq!(nums.len() % 3, 0, "bad line {:?}", line);
    nums.chunks(3).map(|c| (c[0], c[1], c[2])).collect()
}

/// Checks every `read:` line and returns `(lines, misses, hits)` summed over all of them.
fn sum_read_lines(lines: &[&str], readers: usize) -> (u64, u64, u64) {
    let (mut misses, mut hits) = (0, 0);
    for line in lines {
        let groups = parse_read_line(line);
        assert_eq!(groups.len(), readers, "{}", line);
        for (total, m, h) in groups {
            assert_eq!(total, m + h);
            misses += m;
            hits += h;
        }
    }
    (lines.len() as u64, misses, hits)
}

fn cancel_after(token: &CancellationToken, delay: Duration) -> thread::JoinHandle<()> {
    let token = token.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        token.cancel();
    })
}

#[test]
fn test_validation_before_start() {
    let token = CancellationToken::new();
    let cases = vec![
        (BoundedConfig::new(vec![0], 10, 1), ValidationError::TooFewCores(1)),
        (BoundedConfig::new(vec![0, 1], 4, 1), ValidationError::DurationTooShort(4)),
        (BoundedConfig::new(vec![0, 1], 5, 0), ValidationError::NoObjects),
    ];
    for (config, expected) in cases {
        let mut out = Vec::new();
        let start = Instant::now();
        match run::run_bounded(&config, &token, &mut out) {
            Err(BenchError::Validation(e)) => assert_eq!(e, expected),
            other => panic!("unexpected {:?}", other),
        }
        assert!(out.is_empty());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    let mut out = Vec::new();
    match run::run_unbounded(&UnboundedConfig::new(0), &token, &mut out) {
        Err(BenchError::Validation(ValidationError::NoReaders)) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!token.is_cancelled());
}

#[test]
fn test_unavailable_core() {
    let cores = match cores(1, 1) {
        Some(c) => c,
        None => return,
    };
    let config = BoundedConfig::new(vec![cores[0], usize::MAX], 5, 1);
    let mut out = Vec::new();
    match run::run_bounded(&config, &CancellationToken::new(), &mut out) {
        Err(BenchError::Affinity(AffinityError::Unavailable(id))) => assert_eq!(id, usize::MAX),
        other => panic!("unexpected {:?}", other),
    }
    assert!(out.is_empty());
}

#[test]
fn test_bounded_end_to_end() {
    let cores = match cores(2, 3) {
        Some(c) => c,
        None => return,
    };
    let readers = cores.len() - 1;
    let config = BoundedConfig::new(cores, 5, 3);
    let mut out = Vec::new();
    let summary = run::run_bounded(&config, &CancellationToken::new(), &mut out).unwrap();

    assert_eq!(summary.avg_total, summary.avg_misses + summary.avg_hits);
    assert!(summary.avg_total > 0);

    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 6, "{}", out);
    let (ticks, misses, hits) = sum_read_lines(&lines[..5], readers);
    assert_eq!(summary.avg_misses, misses / ticks);
    assert_eq!(summary.avg_hits, hits / ticks);
    assert_eq!(lines[5], summary.to_string());
}

#[test]
fn test_bounded_stopped_early() {
    let cores = match cores(2, 2) {
        Some(c) => c,
        None => return,
    };
    let mut config = BoundedConfig::new(cores, 60, 2);
    config.workload.backend = Backend::SpinRwLock;
    config.workload.key_mode = KeyMode::Disjoint;
    let token = CancellationToken::new();
    let stopper = cancel_after(&token, Duration::from_millis(2500));
    let start = Instant::now();
    let mut out = Vec::new();
    let summary = run::run_bounded(&config, &token, &mut out).unwrap();
    stopper.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.avg_total, summary.avg_misses + summary.avg_hits);
    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines.len() >= 2, "{}", out);
    let (ticks, misses, hits) = sum_read_lines(&lines[..lines.len() - 1], 1);
    assert_eq!(summary.avg_misses, misses / ticks);
    assert_eq!(summary.avg_hits, hits / ticks);
    assert_eq!(lines[lines.len() - 1], summary.to_string());
}

#[test]
fn test_unbounded_stops_on_cancel() {
    // Readers share cores round robin, so this runs on a single core machine too.
    let mut config = UnboundedConfig::new(2);
    config.workload.key_mode = KeyMode::Fixed(20);
    let token = CancellationToken::new();
    let stopper = cancel_after(&token, Duration::from_millis(2500));
    let mut out = Vec::new();
    let summary = run::run_unbounded(&config, &token, &mut out).unwrap();
    stopper.join().unwrap();

    let out = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines.len() >= 2, "{}", out);
    let (ticks, misses, hits) = sum_read_lines(&lines[..lines.len() - 1], 2);
    assert!(misses + hits > 0);
    // Lookups after the last printed second are left out of the averages.
    assert_eq!(summary.avg_misses, misses / ticks);
    assert_eq!(summary.avg_hits, hits / ticks);
    assert!(summary.avg_total * ticks <= misses + hits);
    assert_eq!(lines[lines.len() - 1], summary.to_string());
    assert_eq!(summary.avg_total, summary.avg_misses + summary.avg_hits);
}
