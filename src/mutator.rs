//! Insert/remove churn run by the control thread.

use crate::config::KeyMode;
use crate::error::BenchError;
use crate::table::Table;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Inserts a fixed batch of keys, pauses, removes them again.
pub struct Mutator {
    table: Arc<dyn Table>,
    keys: Vec<u32>,
    pause: Duration,
    cycles: u64,
}

impl Mutator {
    /// Churns `0..object_count`, plus a fixed lookup key that lies outside that range so the
    /// readers see both outcomes for it.
    pub fn new(
        table: Arc<dyn Table>,
        object_count: u32,
        key_mode: KeyMode,
        pause: Duration,
    ) -> Self {
        let mut keys: Vec<u32> = (0..object_count).collect();
        keys.extend(key_mode.extra_mutator_key(object_count));
        Mutator {
            table,
            keys,
            pause,
            cycles: 0,
        }
    }

    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// Completed insert/remove cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Insert every key with value 0.
    pub fn insert_all(&self) -> Result<(), BenchError> {
        for &key in &self.keys {
            self.table.insert(key, 0)?;
        }
        Ok(())
    }

    /// Remove every key. Keys already gone are skipped silently.
    pub fn remove_all(&mut self) -> Result<(), BenchError> {
        for &key in &self.keys {
            self.table.remove(key)?;
        }
        self.cycles += 1;
        Ok(())
    }

    pub fn pause(&self) {
        if !self.pause.is_zero() {
            thread::sleep(self.pause);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::table::Backend;

    #[test]
    fn test_cycle() {
        let table = Backend::Rcu.build(64).unwrap();
        let mut m = Mutator::new(table.clone(), 3, KeyMode::Fixed(0), Duration::from_millis(1));
        assert_eq!(m.keys(), &[0, 1, 2]);
        m.insert_all().unwrap();
        assert!((0..3).all(|k| table.lookup(k).unwrap()));
        assert!(!table.lookup(3).unwrap());
        m.pause();
        m.remove_all().unwrap();
        assert!((0..3).all(|k| !table.lookup(k).unwrap()));
        // Nothing left to remove.
        m.remove_all().unwrap();
        assert_eq!(m.cycles(), 2);
    }

    #[test]
    fn test_far_lookup_key_is_churned() {
        let table = Backend::SpinRwLock.build(64).unwrap();
        let m = Mutator::new(table.clone(), 2, KeyMode::Fixed(40), Duration::ZERO);
        assert_eq!(m.keys(), &[0, 1, 40]);
        m.insert_all().unwrap();
        assert!(table.lookup(40).unwrap());
    }
}
