//! Reader threads: pin, report the binding, then look keys up until cancelled.

use crate::affinity;
use crate::cancel::CancellationToken;
use crate::config::Backoff;
use crate::counters::PaddedCounters;
use crate::error::{AffinityError, BenchError};
use crate::table::Table;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle of a `ReaderWorker`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Created = 0,
    Bound = 1,
    Running = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> WorkerState {
        match v {
            0 => WorkerState::Created,
            1 => WorkerState::Bound,
            2 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// A worker's state as seen from other threads. The reader thread is the only writer.
#[derive(Clone, Debug)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> SharedState {
        SharedState(Arc::new(AtomicU8::new(WorkerState::Created as u8)))
    }

    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Result of the bind step, sent back to the controller as `(reader index, result)`.
pub type BindReport = (usize, Result<(), AffinityError>);

pub struct ReaderWorker {
    index: usize,
    core_id: usize,
    keys: Vec<u32>,
    table: Arc<dyn Table>,
    counters: Arc<[PaddedCounters]>,
    token: CancellationToken,
    backoff: Backoff,
    state: SharedState,
}

impl ReaderWorker {
    /// `keys` must not be empty; the worker cycles over them in order.
    pub fn new(
        index: usize,
        core_id: usize,
        keys: Vec<u32>,
        table: Arc<dyn Table>,
        counters: Arc<[PaddedCounters]>,
        token: CancellationToken,
        backoff: Backoff,
    ) -> Self {
        debug_assert!(!keys.is_empty());
        debug_assert!(index < counters.len());
        ReaderWorker {
            index,
            core_id,
            keys,
            table,
            counters,
            token,
            backoff,
            state: SharedState::new(),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// Handle that keeps tracking the state after the worker moved to its thread.
    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// Start the worker on a thread named `reader-<index>`.
    pub fn spawn(
        self,
        bound: Sender<BindReport>,
    ) -> Result<JoinHandle<Result<u64, BenchError>>, BenchError> {
        let name = format!("reader-{}", self.index);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(bound))
            .map_err(|source| BenchError::ThreadSpawn { name, source })
    }

    /// Bind, report, loop. Returns the number of completed lookups.
    pub fn run(self, bound: Sender<BindReport>) -> Result<u64, BenchError> {
        let res = affinity::bind(self.core_id);
        self.state.set(match res {
            Ok(()) => WorkerState::Bound,
            Err(_) => WorkerState::Stopped,
        });
        // The controller may already be gone if another reader failed first.
        let _ = bound.send((self.index, res.clone()));
        res?;

        self.state.set(WorkerState::Running);
        let res = self.lookup_loop();
        self.state.set(WorkerState::Stopped);
        if let Err(ref e) = res {
            error!("reader {} stopped: {}", self.index, e);
            self.token.cancel();
        }
        res
    }

    fn lookup_loop(&self) -> Result<u64, BenchError> {
        let counters = &self.counters[self.index];
        let mut iterations = 0u64;
        let mut next = 0;
        while !self.token.is_cancelled() {
            let key = self.keys[next];
            next += 1;
            if next == self.keys.len() {
                next = 0;
            }
            let found = self.table.lookup(key)?;
            counters.record(found);
            iterations += 1;
            self.backoff.pause();
        }
        debug!(
            "reader {} on core {} done after {} lookups",
            self.index, self.core_id, iterations
        );
        Ok(iterations)
    }
}
