//! Per reader hit/miss counters.
//!
//! Each reader owns one `PaddedCounters` and is its only writer. The stats sampler reads them from
//! the control thread with plain relaxed loads: no lock and no read-modify-write on the hot path.
//! A sample may be a little stale but is never torn, because each value is a single 64-bit atomic.

use crate::util::WrappedAlign64Type;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hits and misses of one reader.
#[derive(Debug, Default)]
pub struct ThreadCounters {
    found: AtomicU64,
    not_found: AtomicU64,
}

/// `ThreadCounters` on a cache line of its own, so readers never write to a line another reader
/// writes to.
pub type PaddedCounters = WrappedAlign64Type<ThreadCounters>;

/// Copy of a reader's counters at one instant.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub found: u64,
    pub not_found: u64,
}

impl CounterSnapshot {
    pub fn total(&self) -> u64 {
        self.found + self.not_found
    }
}

impl ThreadCounters {
    /// Only the owning reader may call this.
    #[inline]
    pub fn record_found(&self) {
        let v = self.found.load(Ordering::Relaxed);
        self.found.store(v + 1, Ordering::Relaxed);
    }

    /// Only the owning reader may call this.
    #[inline]
    pub fn record_not_found(&self) {
        let v = self.not_found.load(Ordering::Relaxed);
        self.not_found.store(v + 1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record(&self, found: bool) {
        if found {
            self.record_found();
        } else {
            self.record_not_found();
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            found: self.found.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::mem;

    #[test]
    fn test_padding() {
        assert_eq!(mem::align_of::<PaddedCounters>(), 64);
        assert_eq!(mem::size_of::<PaddedCounters>(), 64);
        let all: Vec<PaddedCounters> = (0..3).map(|_| PaddedCounters::default()).collect();
        assert_eq!(
            &all[1] as *const _ as usize - &all[0] as *const _ as usize,
            64
        );
    }

    #[test]
    fn test_record() {
        let c = PaddedCounters::default();
        c.record(true);
        c.record(false);
        c.record_not_found();
        let s = c.snapshot();
        assert_eq!(s, CounterSnapshot { found: 1, not_found: 2 });
        assert_eq!(s.total(), 3);
    }
}
