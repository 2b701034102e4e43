//! The shared container as seen by the harness: lookup, insert and remove of `u32` keys, each in
//! a read-side critical section of its own.

use crate::error::EpochError;
use crate::rcu_map::RcuHashMap;
use crate::spin_rwlock::SpinRwLock;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Operations the readers and the mutator run against the shared container.
pub trait Table: Send + Sync + fmt::Debug {
    /// True if `key` is present.
    fn lookup(&self, key: u32) -> Result<bool, EpochError>;

    /// Add `key` or replace its value.
    fn insert(&self, key: u32, value: u32) -> Result<(), EpochError>;

    /// Remove `key`. Returns false if it was absent.
    fn remove(&self, key: u32) -> Result<bool, EpochError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

impl Table for RcuHashMap<u32, u32> {
    #[inline]
    fn lookup(&self, key: u32) -> Result<bool, EpochError> {
        self.contains_key(&key)
    }

    fn insert(&self, key: u32, value: u32) -> Result<(), EpochError> {
        self.insert_or_replace(key, value).map(|_| ())
    }

    fn remove(&self, key: u32) -> Result<bool, EpochError> {
        RcuHashMap::remove(self, &key)
    }

    fn name(&self) -> &'static str {
        "rcu"
    }
}

/// Baseline: a plain `HashMap` behind a spin reader-writer lock.
pub type SpinRwLockMap = SpinRwLock<HashMap<u32, u32>>;

impl Table for SpinRwLockMap {
    #[inline]
    fn lookup(&self, key: u32) -> Result<bool, EpochError> {
        Ok(self.rlock().contains_key(&key))
    }

    fn insert(&self, key: u32, value: u32) -> Result<(), EpochError> {
        self.lock().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: u32) -> Result<bool, EpochError> {
        Ok(self.lock().remove(&key).is_some())
    }

    fn name(&self) -> &'static str {
        "spin-rwlock"
    }
}

/// Which container implementation a run measures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    Rcu,
    SpinRwLock,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Rcu
    }
}

impl Backend {
    /// Allocate an empty container. `bucket_count` only applies to the RCU table.
    pub fn build(self, bucket_count: usize) -> Result<Arc<dyn Table>, EpochError> {
        let table: Arc<dyn Table> = match self {
            Backend::Rcu => Arc::new(RcuHashMap::<u32, u32>::with_buckets(bucket_count)?),
            Backend::SpinRwLock => Arc::new(SpinRwLockMap::default()),
        };
        Ok(table)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Rcu => write!(f, "rcu"),
            Backend::SpinRwLock => write!(f, "spin-rwlock"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rcu" => Ok(Backend::Rcu),
            "spin-rwlock" | "rwlock" => Ok(Backend::SpinRwLock),
            _ => Err(format!("unknown backend `{}`, expected rcu or spin-rwlock", s)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::Backend;

    #[test]
    fn test_backends_behave_alike() {
        for backend in [Backend::Rcu, Backend::SpinRwLock] {
            let table = backend.build(64).unwrap();
            assert_eq!(table.name(), backend.to_string());
            assert!(!table.lookup(3).unwrap());
            table.insert(3, 0).unwrap();
            table.insert(3, 1).unwrap();
            assert!(table.lookup(3).unwrap());
            assert!(table.remove(3).unwrap());
            assert!(!table.remove(3).unwrap());
            assert!(!table.lookup(3).unwrap());
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("rcu".parse::<Backend>(), Ok(Backend::Rcu));
        assert_eq!("rwlock".parse::<Backend>(), Ok(Backend::SpinRwLock));
        assert!("btree".parse::<Backend>().is_err());
    }
}
