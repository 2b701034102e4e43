use crate::util;
use std::sync::atomic::{AtomicI8, Ordering};

/// User mode SpinLock
#[derive(Debug)]
pub struct SpinLock {
    atomic: AtomicI8,
}

impl Default for SpinLock {
    fn default() -> Self {
        SpinLock::new()
    }
}

impl SpinLock {
    pub const fn new() -> SpinLock {
        SpinLock {
            atomic: AtomicI8::new(0),
        }
    }

    /// Keep trying to lock until success.
    pub fn lock(&self) {
        while self.is_locked() || !self.cxchg(0, 1) {
            util::pause();
        }
    }

    /// Keep trying to lock until success, then return SpinLockGuard.
    #[inline]
    pub fn lock_guard(&self) -> SpinLockGuard<'_> {
        self.lock();
        SpinLockGuard::new(self)
    }

    /// Unlock if is locked, else panic.
    #[inline]
    pub fn unlock(&self) {
        assert!(self.is_locked() && self.cxchg(1, 0));
    }

    /// Return true if locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        0 != self.atomic.load(Ordering::Relaxed)
    }

    /// Return true if lock successfully.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.is_locked() && self.cxchg(0, 1)
    }

    #[inline]
    fn cxchg(&self, old: i8, new: i8) -> bool {
        self.atomic
            .compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }
}

/// Guard of SpinLock, unlock it when dropped.
#[derive(Debug)]
pub struct SpinLockGuard<'a> {
    spin_lock: &'a SpinLock,
}

impl<'a> SpinLockGuard<'a> {
    fn new(spin_lock: &'a SpinLock) -> Self {
        SpinLockGuard { spin_lock }
    }
}

impl<'a> Drop for SpinLockGuard<'a> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}

#[cfg(test)]
mod test {
    use super::SpinLock;
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    struct Shared {
        lock: SpinLock,
        value: UnsafeCell<u64>,
    }

    unsafe impl Sync for Shared {}

    #[test]
    fn test_base() {
        let l = SpinLock::default();
        assert!(!l.is_locked());
        assert!(l.try_lock());
        assert!(!l.try_lock());
        l.unlock();
        {
            let _g = l.lock_guard();
            assert!(l.is_locked());
        }
        assert!(!l.is_locked());
    }

    #[test]
    fn test_multi_thread() {
        let shared = Arc::new(Shared {
            lock: SpinLock::new(),
            value: UnsafeCell::new(0),
        });
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        let _g = shared.lock.lock_guard();
                        unsafe { *shared.value.get() += 1 };
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(unsafe { *shared.value.get() }, 40_000);
    }
}
