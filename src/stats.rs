//! Once per second rate sampling over every reader's counters, and the end of run averages.

use crate::counters::{CounterSnapshot, PaddedCounters};
use crate::util;
use std::fmt;

/// Per reader deltas over one wall-clock second, in reader order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondReport {
    pub second: i64,
    pub deltas: Vec<CounterSnapshot>,
}

impl SecondReport {
    pub fn total(&self) -> CounterSnapshot {
        sum(self.deltas.iter().copied())
    }
}

/// `read: <total> [<misses> + <hits>] ...` with one group per reader.
impl fmt::Display for SecondReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read: ")?;
        for d in &self.deltas {
            write!(f, "{} [{} + {}] ", d.total(), d.not_found, d.found)?;
        }
        Ok(())
    }
}

/// Remembers the previous snapshot of every reader and the second it was taken in.
#[derive(Debug)]
pub struct StatsAggregator {
    prev: Vec<CounterSnapshot>,
    last_second: i64,
}

impl StatsAggregator {
    /// `start_second` is the second the readers were started in. `workers` counters all start at
    /// zero.
    pub fn new(workers: usize, start_second: i64) -> Self {
        StatsAggregator {
            prev: vec![CounterSnapshot::default(); workers],
            last_second: start_second,
        }
    }

    pub fn last_second(&self) -> i64 {
        self.last_second
    }

    /// Sum over every reader of the counters as of the last report. Lookups made after that
    /// report are not included, so this matches the seconds reported so far.
    pub fn sampled(&self) -> CounterSnapshot {
        sum(self.prev.iter().copied())
    }

    /// Sample against the current wall-clock second.
    pub fn sample(&mut self, counters: &[PaddedCounters]) -> Option<SecondReport> {
        self.sample_at(util::get_cur_seconds_time(), counters)
    }

    /// Returns a report if `now_sec` is past the last sampled second, `None` otherwise.
    pub fn sample_at(&mut self, now_sec: i64, counters: &[PaddedCounters]) -> Option<SecondReport> {
        if now_sec <= self.last_second {
            return None;
        }
        debug_assert_eq!(counters.len(), self.prev.len());
        let deltas = counters
            .iter()
            .zip(self.prev.iter_mut())
            .map(|(c, prev)| {
                let now = c.snapshot();
                // Single writer counters never go backwards; saturate anyway.
                let d = CounterSnapshot {
                    found: now.found.saturating_sub(prev.found),
                    not_found: now.not_found.saturating_sub(prev.not_found),
                };
                *prev = now;
                d
            })
            .collect();
        self.last_second = now_sec;
        Some(SecondReport {
            second: now_sec,
            deltas,
        })
    }
}

fn sum<I: Iterator<Item = CounterSnapshot>>(snapshots: I) -> CounterSnapshot {
    snapshots.fold(CounterSnapshot::default(), |acc, s| CounterSnapshot {
        found: acc.found + s.found,
        not_found: acc.not_found + s.not_found,
    })
}

/// Per second averages over a whole run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub avg_total: u64,
    pub avg_misses: u64,
    pub avg_hits: u64,
}

impl Summary {
    /// Integer averages over `seconds` (at least 1). `avg_total` is the sum of the two rounded
    /// averages rather than `(found + not_found) / seconds`, so it always equals
    /// `avg_misses + avg_hits` and may be 1 below the directly divided total.
    pub fn compute(totals: CounterSnapshot, seconds: u64) -> Summary {
        let seconds = seconds.max(1);
        let avg_misses = totals.not_found / seconds;
        let avg_hits = totals.found / seconds;
        Summary {
            avg_total: avg_misses + avg_hits,
            avg_misses,
            avg_hits,
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total read: {} [{} + {}]",
            self.avg_total, self.avg_misses, self.avg_hits
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_sample_deltas() {
        let counters: Vec<PaddedCounters> = (0..2).map(|_| PaddedCounters::default()).collect();
        let mut agg = StatsAggregator::new(2, 100);
        counters[0].record(true);
        counters[1].record(false);
        counters[1].record(false);
        assert_eq!(agg.sample_at(100, &counters), None);

        let r = agg.sample_at(101, &counters).unwrap();
        assert_eq!(
            r.deltas,
            vec![
                CounterSnapshot { found: 1, not_found: 0 },
                CounterSnapshot { found: 0, not_found: 2 },
            ]
        );
        assert_eq!(r.to_string(), "read: 1 [0 + 1] 2 [2 + 0] ");
        assert_eq!(r.total().total(), 3);

        counters[0].record(false);
        let r = agg.sample_at(102, &counters).unwrap();
        assert_eq!(r.to_string(), "read: 1 [1 + 0] 0 [0 + 0] ");
        assert_eq!(agg.last_second(), 102);
        assert_eq!(agg.sample_at(102, &counters), None);
    }

    #[test]
    fn test_summary() {
        let s = Summary::compute(CounterSnapshot { found: 11, not_found: 7 }, 2);
        assert_eq!(
            s,
            Summary {
                avg_total: 8,
                avg_misses: 3,
                avg_hits: 5
            }
        );
        assert_eq!(s.to_string(), "total read: 8 [3 + 5]");
        assert_eq!(Summary::compute(CounterSnapshot { found: 4, not_found: 0 }, 0).avg_hits, 4);

        // Each part rounds down on its own: 2 lookups over 2 seconds report 0 + 0.
        let s = Summary::compute(CounterSnapshot { found: 1, not_found: 1 }, 2);
        assert_eq!(s.to_string(), "total read: 0 [0 + 0]");
        assert_eq!(s.avg_total, 0);
        assert_eq!(s.avg_total + 1, (1 + 1) / 2);
    }


    #[test]
    fn test_sampled_excludes_lookups_after_last_report() {
        let counters: Vec<PaddedCounters> = (0..2).map(|_| PaddedCounters::default()).collect();
        let mut agg = StatsAggregator::new(2, 10);
        assert_eq!(agg.sampled(), CounterSnapshot::default());

        counters[0].record(true);
        counters[1].record(false);
        agg.sample_at(11, &counters).unwrap();
        counters[0].record(true);
        agg.sample_at(12, &counters).unwrap();
        for _ in 0..5 {
            counters[1].record(true);
        }

        assert_eq!(agg.sampled(), CounterSnapshot { found: 2, not_found: 1 });
        let live = sum(counters.iter().map(|c| c.snapshot()));
        assert_eq!(live, CounterSnapshot { found: 7, not_found: 1 });
        let s = Summary::compute(agg.sampled(), 2);
        assert_eq!(s.to_string(), "total read: 1 [0 + 1]");
    }

    #[test]
    fn test_sample_while_reader_records() {
        let counters: Vec<PaddedCounters> = (0..1).map(|_| PaddedCounters::default()).collect();
        let stop = AtomicBool::new(false);
        let mut agg = StatsAggregator::new(1, 0);

        thread::scope(|s| {
            let counters = &counters;
            let stop = &stop;
            let writer = s.spawn(move || {
                let mut n = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    counters[0].record(n % 3 == 0);
                    n += 1;
                }
                n
            });

            let mut reported = CounterSnapshot::default();
            let mut last = CounterSnapshot::default();
            for second in 1..=2_000 {
                let r = agg.sample_at(second, counters).unwrap();
                let d = r.total();
                reported.found += d.found;
                reported.not_found += d.not_found;
                let now = agg.sampled();
                assert!(now.found >= last.found && now.not_found >= last.not_found);
                assert_eq!(now, reported);
                last = now;
            }

            stop.store(true, Ordering::Relaxed);
            let recorded = writer.join().unwrap();
            let r = agg.sample_at(2_001, counters).unwrap();
            let d = r.total();
            reported.found += d.found;
            reported.not_found += d.not_found;
            assert_eq!(reported, counters[0].snapshot());
            assert_eq!(reported.total(), recorded);
            assert_eq!(agg.sampled(), reported);
        });
    }
}
