//! Run controller: starts the readers, turns the calling thread into the mutator and samples the
//! counters once per second until the run ends.

use crate::affinity;
use crate::cancel::CancellationToken;
use crate::config::{BoundedConfig, UnboundedConfig, Workload, WorkloadConfig};
use crate::counters::PaddedCounters;
use crate::error::BenchError;
use crate::mutator::Mutator;
use crate::counters::CounterSnapshot;
use crate::stats::{StatsAggregator, Summary};
use crate::table::Table;
use crate::util;
use crate::worker::{ReaderWorker, SharedState, WorkerState};
use std::io::Write;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Run either mode, printing the per second lines and the summary to `out`.
pub fn run<W: Write>(
    config: &WorkloadConfig,
    token: &CancellationToken,
    out: &mut W,
) -> Result<Summary, BenchError> {
    match config {
        WorkloadConfig::Bounded(c) => run_bounded(c, token, out),
        WorkloadConfig::Unbounded(c) => run_unbounded(c, token, out),
    }
}

/// Fixed length run: one reader per core but the last, the calling thread pinned to the last
/// core. Runs `duration_seconds` ticks unless `token` is cancelled first.
pub fn run_bounded<W: Write>(
    config: &BoundedConfig,
    token: &CancellationToken,
    out: &mut W,
) -> Result<Summary, BenchError> {
    config.validate()?;
    let (reader_cores, mutator_core) = config.split_cores()?;
    affinity::check_available(&config.core_ids)?;
    info!(
        "bounded run: readers on {:?}, mutator on {}, {} s, {} objects, {} backend",
        reader_cores,
        mutator_core,
        config.duration_seconds,
        config.object_count,
        config.workload.backend
    );
    let totals = drive(
        reader_cores,
        mutator_core,
        config.object_count,
        &config.workload,
        Some(config.duration_seconds),
        token,
        out,
    )?;
    finish(totals, out)
}

/// Open ended run over the 11 key workload, readers and controller spread round robin over the
/// available cores. Stops when `token` is cancelled.
pub fn run_unbounded<W: Write>(
    config: &UnboundedConfig,
    token: &CancellationToken,
    out: &mut W,
) -> Result<Summary, BenchError> {
    config.validate()?;
    let cores = affinity::available_cores()?;
    let reader_cores: Vec<usize> = (0..config.reader_threads)
        .map(|i| cores[i % cores.len()])
        .collect();
    let mutator_core = cores[config.reader_threads % cores.len()];
    info!(
        "unbounded run: {} readers on {:?}, mutator on {}, {} backend",
        config.reader_threads, reader_cores, mutator_core, config.workload.backend
    );
    let totals = drive(
        &reader_cores,
        mutator_core,
        config.object_count(),
        &config.workload,
        None,
        token,
        out,
    )?;
    finish(totals, out)
}

/// Completed ticks and the counters as of the last of them.
struct Totals {
    ticks: u64,
    sampled: CounterSnapshot,
}

fn finish<W: Write>(totals: Totals, out: &mut W) -> Result<Summary, BenchError> {
    let summary = Summary::compute(totals.sampled, totals.ticks);
    writeln!(out, "{}", summary)?;
    out.flush()?;
    Ok(summary)
}

fn drive<W: Write>(
    reader_cores: &[usize],
    mutator_core: usize,
    object_count: u32,
    workload: &Workload,
    tick_limit: Option<u64>,
    token: &CancellationToken,
    out: &mut W,
) -> Result<Totals, BenchError> {
    let table = workload.backend.build(workload.bucket_count)?;
    let counters: Arc<[PaddedCounters]> = reader_cores
        .iter()
        .map(|_| PaddedCounters::default())
        .collect();

    let start = util::wait_next_second();
    let readers = ReaderSet::start(
        reader_cores,
        &table,
        &counters,
        token,
        workload,
        object_count,
    )?;

    let mut mutator = Mutator::new(
        table.clone(),
        object_count,
        workload.key_mode,
        workload.mutator_pause,
    );
    let mut stats = StatsAggregator::new(reader_cores.len(), start);
    let res = affinity::bind(mutator_core)
        .map_err(BenchError::from)
        .and_then(|_| control_loop(&mut mutator, &counters, &mut stats, tick_limit, token, out));

    token.cancel();
    let joined = readers.join();
    let ticks = res?;
    let lookups = joined?;
    let sampled = stats.sampled();
    debug!(
        "{} ticks, {} mutator cycles, {} lookups, {} sampled",
        ticks,
        mutator.cycles(),
        lookups,
        sampled.total()
    );
    Ok(Totals { ticks, sampled })
}

fn control_loop<W: Write>(
    mutator: &mut Mutator,
    counters: &[PaddedCounters],
    stats: &mut StatsAggregator,
    tick_limit: Option<u64>,
    token: &CancellationToken,
    out: &mut W,
) -> Result<u64, BenchError> {
    let mut ticks = 0;
    loop {
        mutator.insert_all()?;
        mutator.pause();
        if let Some(report) = stats.sample(counters) {
            writeln!(out, "{}", report)?;
            out.flush()?;
            ticks += 1;
            if let Some(limit) = tick_limit {
                debug!("{} seconds left", limit.saturating_sub(ticks));
            }
        }
        mutator.remove_all()?;
        if tick_limit.map_or(false, |limit| ticks >= limit) {
            break;
        }
        if token.is_cancelled() {
            info!("stopped after {} ticks", ticks);
            break;
        }
    }
    Ok(ticks)
}

/// Started reader threads. Always stopped through the shared token, then joined.
struct ReaderSet {
    handles: Vec<JoinHandle<Result<u64, BenchError>>>,
    states: Vec<SharedState>,
    token: CancellationToken,
}

impl ReaderSet {
    /// Spawn one reader per core and wait until every one of them reports its binding. On any
    /// failure the readers already started are stopped and joined before returning.
    fn start(
        cores: &[usize],
        table: &Arc<dyn Table>,
        counters: &Arc<[PaddedCounters]>,
        token: &CancellationToken,
        workload: &Workload,
        object_count: u32,
    ) -> Result<ReaderSet, BenchError> {
        let mut set = ReaderSet {
            handles: Vec::with_capacity(cores.len()),
            states: Vec::with_capacity(cores.len()),
            token: token.clone(),
        };
        let (tx, rx) = mpsc::channel();
        for (i, &core) in cores.iter().enumerate() {
            let keys = workload.key_mode.reader_keys(i, cores.len(), object_count);
            let worker = ReaderWorker::new(
                i,
                core,
                keys,
                table.clone(),
                counters.clone(),
                token.clone(),
                workload.backoff,
            );
            debug_assert_eq!(worker.state(), WorkerState::Created);
            set.states.push(worker.shared_state());
            match worker.spawn(tx.clone()) {
                Ok(handle) => set.handles.push(handle),
                Err(e) => {
                    set.abort();
                    return Err(e);
                }
            }
        }
        drop(tx);

        let mut reported = vec![false; cores.len()];
        for _ in 0..cores.len() {
            match rx.recv() {
                Ok((i, Ok(()))) => reported[i] = true,
                Ok((_, Err(e))) => {
                    set.abort();
                    return Err(e.into());
                }
                Err(_) => {
                    let lost = reported.iter().position(|r| !r).unwrap_or(0);
                    set.abort();
                    return Err(BenchError::ReaderLost(lost));
                }
            }
        }
        debug!("readers started: {:?}", set.states());
        Ok(set)
    }

    fn states(&self) -> Vec<WorkerState> {
        self.states.iter().map(|s| s.get()).collect()
    }

    fn abort(self) {
        self.token.cancel();
        if let Err(e) = self.join() {
            warn!("reader failed while aborting the run: {}", e);
        }
    }

    /// Join every reader. Returns the total number of lookups, or the first failure in reader
    /// order.
    fn join(self) -> Result<u64, BenchError> {
        let mut lookups = 0;
        let mut first_err = None;
        for (i, (handle, state)) in self.handles.into_iter().zip(&self.states).enumerate() {
            let res = match handle.join() {
                Ok(res) => {
                    debug_assert_eq!(state.get(), WorkerState::Stopped);
                    res
                }
                Err(_) => Err(BenchError::ReaderPanicked(i)),
            };
            match res {
                Ok(n) => lookups += n,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(lookups),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reader_states_follow_the_run() {
        let core = affinity::available_cores().unwrap()[0];
        let workload = Workload::default();
        let table = workload.backend.build(workload.bucket_count).unwrap();
        let counters: Arc<[PaddedCounters]> = (0..2).map(|_| PaddedCounters::default()).collect();
        let token = CancellationToken::new();
        let set = ReaderSet::start(&[core, core], &table, &counters, &token, &workload, 1).unwrap();
        for state in set.states() {
            assert!(
                state == WorkerState::Bound || state == WorkerState::Running,
                "{:?}",
                state
            );
        }
        let states = set.states.clone();

        token.cancel();
        set.join().unwrap();
        for state in states {
            assert_eq!(state.get(), WorkerState::Stopped);
        }
    }
}
