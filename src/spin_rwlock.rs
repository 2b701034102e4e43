use crate::util;
use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

const MAX_REF_CNT: u64 = 0x00ff_ffff;
const R_REF_CNT_MASK: u64 = 0x3fff_ffff_ffff_ffff;
const W_PENDING_BIT: u64 = 0x4000_0000_0000_0000;
const W_LOCK_BIT: u64 = 0x8000_0000_0000_0000;

/// Snapshot of the lock word: 62 bit reader count, 1 bit writer pending, 1 bit writer holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct LockWord(u64);

impl LockWord {
    #[inline]
    fn r_ref_cnt(self) -> u64 {
        self.0 & R_REF_CNT_MASK
    }

    #[inline]
    fn w_pending(self) -> bool {
        0 != self.0 & W_PENDING_BIT
    }

    #[inline]
    fn w_lock_flag(self) -> bool {
        0 != self.0 & W_LOCK_BIT
    }

    #[inline]
    fn with_r_ref_cnt(self, r_ref_cnt: u64) -> LockWord {
        LockWord((self.0 & !R_REF_CNT_MASK) | (r_ref_cnt & R_REF_CNT_MASK))
    }

    #[inline]
    fn with_w_pending(self, w_pending: bool) -> LockWord {
        if w_pending {
            LockWord(self.0 | W_PENDING_BIT)
        } else {
            LockWord(self.0 & !W_PENDING_BIT)
        }
    }

    #[inline]
    fn with_w_lock_flag(self, w_lock_flag: bool) -> LockWord {
        if w_lock_flag {
            LockWord(self.0 | W_LOCK_BIT)
        } else {
            LockWord(self.0 & !W_LOCK_BIT)
        }
    }

    /// Readers are admitted only while no writer holds or waits for the lock.
    #[inline]
    fn readable(self) -> bool {
        !self.w_pending() && !self.w_lock_flag() && MAX_REF_CNT > self.r_ref_cnt()
    }
}

/// Writer-preferring spin reader-writer lock. A writer that finds the lock busy raises the pending
/// bit, which keeps new readers out until it gets in.
pub struct SpinRwLock<T> {
    atomic: AtomicU64,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for SpinRwLock<T> {}

impl<T: Default> Default for SpinRwLock<T> {
    fn default() -> Self {
        SpinRwLock::new(T::default())
    }
}

impl<T> fmt::Debug for SpinRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.atomic();
        f.debug_struct("SpinRwLock")
            .field("readers", &word.r_ref_cnt())
            .field("w_pending", &word.w_pending())
            .field("w_locked", &word.w_lock_flag())
            .finish()
    }
}

impl<T> SpinRwLock<T> {
    pub fn new(data: T) -> Self {
        SpinRwLock {
            atomic: AtomicU64::new(0),
            data: UnsafeCell::new(data),
        }
    }

    #[inline]
    fn atomic(&self) -> LockWord {
        LockWord(self.atomic.load(Ordering::Acquire))
    }

    #[inline]
    fn cxchg(&self, old: LockWord, new: LockWord) -> bool {
        self.atomic
            .compare_exchange(old.0, new.0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn try_rlock(&self) -> Option<RLockGuard<'_, T>> {
        let old_v = self.atomic();
        let new_v = old_v.with_r_ref_cnt(old_v.r_ref_cnt() + 1);
        if old_v.readable() && self.cxchg(old_v, new_v) {
            Some(RLockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn rlock(&self) -> RLockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_rlock() {
                return guard;
            }
            util::pause();
        }
    }

    fn unrlock(&self) {
        loop {
            let old_v = self.atomic();
            if old_v.w_lock_flag() || 0 == old_v.r_ref_cnt() {
                panic!("read unlock of a lock that is not read locked");
            }
            let new_v = old_v.with_r_ref_cnt(old_v.r_ref_cnt() - 1);
            if self.cxchg(old_v, new_v) {
                break;
            }
            util::pause();
        }
    }

    pub fn try_lock(&self) -> Option<WLockGuard<'_, T>> {
        let old_v = self.atomic();
        let new_v = old_v.with_w_pending(false).with_w_lock_flag(true);
        if !old_v.w_lock_flag() && 0 == old_v.r_ref_cnt() && self.cxchg(old_v, new_v) {
            Some(WLockGuard { lock: self })
        } else {
            None
        }
    }

    pub fn lock(&self) -> WLockGuard<'_, T> {
        loop {
            let old_v = self.atomic();
            if old_v.w_lock_flag() || 0 != old_v.r_ref_cnt() {
                if !old_v.w_pending() {
                    self.cxchg(old_v, old_v.with_w_pending(true));
                }
            } else if self.cxchg(old_v, old_v.with_w_pending(false).with_w_lock_flag(true)) {
                return WLockGuard { lock: self };
            }
            util::pause();
        }
    }

    fn unlock(&self) {
        loop {
            let old_v = self.atomic();
            if !old_v.w_lock_flag() || 0 != old_v.r_ref_cnt() {
                panic!("write unlock of a lock that is not write locked");
            }
            if self.cxchg(old_v, old_v.with_w_lock_flag(false)) {
                break;
            }
            util::pause();
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Shared access, released when dropped.
pub struct RLockGuard<'a, T> {
    lock: &'a SpinRwLock<T>,
}

impl<'a, T> Deref for RLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for RLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unrlock();
    }
}

/// Exclusive access, released when dropped.
pub struct WLockGuard<'a, T> {
    lock: &'a SpinRwLock<T>,
}

impl<'a, T> Deref for WLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for WLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for WLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
