//! Run configuration. Built once (usually by `cli`), validated before any thread starts, and not
//! changed afterwards.

use crate::error::ValidationError;
use crate::rcu_map::DEFAULT_BUCKET_COUNT;
use crate::table::Backend;
use crate::util;
use std::collections::HashSet;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

pub const MIN_CORES: usize = 2;
pub const MIN_SECONDS: u64 = 5;
pub const DEFAULT_SECONDS: u64 = 10;
pub const DEFAULT_OBJECTS: u32 = 1;
/// Keys churned by the mutator in unbounded mode.
pub const UNBOUNDED_OBJECT_COUNT: u32 = 11;
pub const DEFAULT_MUTATOR_PAUSE: Duration = Duration::from_millis(1);

/// Which keys a reader looks up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyMode {
    /// Every reader asks for the same key on every iteration.
    Fixed(u32),
    /// Reader `i` of `n` cycles over `{k < max(objects, n) : k % n == i}`.
    Disjoint,
}

impl Default for KeyMode {
    fn default() -> Self {
        KeyMode::Fixed(0)
    }
}

impl KeyMode {
    /// Keys reader `reader` (of `readers`) cycles over. Never empty.
    pub fn reader_keys(&self, reader: usize, readers: usize, object_count: u32) -> Vec<u32> {
        match *self {
            KeyMode::Fixed(key) => vec![key],
            KeyMode::Disjoint => {
                let span = (object_count as usize).max(readers);
                (0..span)
                    .filter(|k| k % readers == reader)
                    .map(|k| k as u32)
                    .collect()
            }
        }
    }

    /// A fixed lookup key outside `0..object_count`, which the mutator churns as well.
    pub fn extra_mutator_key(&self, object_count: u32) -> Option<u32> {
        match *self {
            KeyMode::Fixed(key) if key >= object_count => Some(key),
            _ => None,
        }
    }
}

/// What a reader does between two lookups.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Nothing: spin on the table as fast as possible.
    None,
    /// `n` spin loop hints.
    Spin(u32),
    /// Give the rest of the time slice away.
    Yield,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::None
    }
}

impl Backoff {
    #[inline]
    pub fn pause(&self) {
        match *self {
            Backoff::None => {}
            Backoff::Spin(n) => {
                for _ in 0..n {
                    util::pause();
                }
            }
            Backoff::Yield => thread::yield_now(),
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "0" => Ok(Backoff::None),
            "yield" => Ok(Backoff::Yield),
            _ => s
                .parse::<u32>()
                .map(Backoff::Spin)
                .map_err(|_| format!("invalid backoff `{}`, expected none, yield or a spin count", s)),
        }
    }
}

/// Options shared by both run modes.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub key_mode: KeyMode,
    pub backoff: Backoff,
    pub backend: Backend,
    pub mutator_pause: Duration,
    pub bucket_count: usize,
}

impl Default for Workload {
    fn default() -> Self {
        Workload {
            key_mode: KeyMode::default(),
            backoff: Backoff::default(),
            backend: Backend::default(),
            mutator_pause: DEFAULT_MUTATOR_PAUSE,
            bucket_count: DEFAULT_BUCKET_COUNT,
        }
    }
}

impl Workload {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.bucket_count.is_power_of_two() {
            return Err(ValidationError::BucketCount(self.bucket_count));
        }
        Ok(())
    }
}

/// Fixed duration run on explicitly listed cores. The last core runs the mutator, the others run
/// one reader each, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundedConfig {
    pub core_ids: Vec<usize>,
    pub duration_seconds: u64,
    pub object_count: u32,
    pub workload: Workload,
}

impl BoundedConfig {
    pub fn new(core_ids: Vec<usize>, duration_seconds: u64, object_count: u32) -> Self {
        BoundedConfig {
            core_ids,
            duration_seconds,
            object_count,
            workload: Workload::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.core_ids.len() < MIN_CORES {
            return Err(ValidationError::TooFewCores(self.core_ids.len()));
        }
        let mut seen = HashSet::new();
        if let Some(&dup) = self.core_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ValidationError::DuplicateCore(dup));
        }
        if self.duration_seconds < MIN_SECONDS {
            return Err(ValidationError::DurationTooShort(self.duration_seconds));
        }
        if self.object_count < 1 {
            return Err(ValidationError::NoObjects);
        }
        self.workload.validate()
    }

    /// `(reader cores, mutator core)`.
    pub fn split_cores(&self) -> Result<(&[usize], usize), ValidationError> {
        match self.core_ids.split_last() {
            Some((&mutator, readers)) if !readers.is_empty() => Ok((readers, mutator)),
            _ => Err(ValidationError::TooFewCores(self.core_ids.len())),
        }
    }
}

/// Open ended run with a fixed 11 key churn, stopped through a `CancellationToken`.
#[derive(Clone, Debug, PartialEq)]
pub struct UnboundedConfig {
    pub reader_threads: usize,
    pub workload: Workload,
}

impl UnboundedConfig {
    pub fn new(reader_threads: usize) -> Self {
        UnboundedConfig {
            reader_threads,
            workload: Workload::default(),
        }
    }

    pub fn object_count(&self) -> u32 {
        UNBOUNDED_OBJECT_COUNT
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.reader_threads < 1 {
            return Err(ValidationError::NoReaders);
        }
        self.workload.validate()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkloadConfig {
    Bounded(BoundedConfig),
    Unbounded(UnboundedConfig),
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            WorkloadConfig::Bounded(c) => c.validate(),
            WorkloadConfig::Unbounded(c) => c.validate(),
        }
    }
}
