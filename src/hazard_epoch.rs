//! Definition and implementations of `HazardEpoch`
//!
use crate::error::EpochError;
use crate::hazard_pointer::{ThreadStore, VersionHandle};
use crate::spin_lock::SpinLock;
use crate::util::{self, WrappedAlign64Type};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};

pub use crate::hazard_pointer::{BaseHazardNode, HazardNodeT};

cfg_if! {
    if #[cfg(feature = "max_thread_count_4096")] {
        pub const MAX_THREAD_COUNT: usize = 4096;
    } else if #[cfg(feature = "max_thread_count_256")] {
        pub const MAX_THREAD_COUNT: usize = 256;
    } else {
        /// Maximum thread count
        pub const MAX_THREAD_COUNT: usize = 16;
    }
}

const DEFAULT_THREAD_WAITING_THRESHOLD: i64 = 64;
const DEFAULT_MIN_VERSION_CACHE_TIME_US: i64 = 200_000;

#[derive(Debug, Default)]
struct VersionTimestamp {
    curr_min_version: AtomicU64,
    curr_min_version_timestamp: AtomicI64,
}

/// `HazardEpoch` a practical implementation of `Hazard Pointers`, which use global incremental
/// version to identify shared object to be reclaimed. Because of [`False sharing`](https://en.wikipedia.org/wiki/False_sharing),
/// a part of the member variables, might be frequently modified by different threads, are aligned
/// to 64 bytes.
///
/// A reader enters a read-side critical section with `acquire` (or `read_guard`), which records
/// the current global version in its thread store. A writer unlinks an object and passes it to
/// `add_node`, which stamps it with a newer version. The object is destroyed once the smallest
/// version held by any reader is at least its stamp, i.e. once every reader that could have
/// seen it has released.
pub struct HazardEpoch {
    thread_waiting_threshold: i64,
    min_version_cache_time_us: i64,
    version: WrappedAlign64Type<AtomicU64>,
    thread_lock: WrappedAlign64Type<SpinLock>,
    threads: Box<[ThreadStore]>,
    thread_list: AtomicPtr<ThreadStore>,
    thread_count: AtomicI64,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    curr_min_version_info: WrappedAlign64Type<VersionTimestamp>,
}

impl fmt::Debug for HazardEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardEpoch")
            .field("version", &self.atomic_load_version())
            .field("thread_count", &self.atomic_load_thread_count())
            .field("hazard_waiting_count", &self.hazard_waiting_count())
            .finish()
    }
}

impl Default for HazardEpoch {
    /// Return `Self::new(64, 200000)`
    fn default() -> Self {
        Self::new(
            DEFAULT_THREAD_WAITING_THRESHOLD,
            DEFAULT_MIN_VERSION_CACHE_TIME_US,
        )
    }
}

impl HazardEpoch {
    #[inline]
    fn curr_min_version(&self) -> u64 {
        self.curr_min_version_info
            .curr_min_version
            .load(Ordering::Acquire)
    }

    #[inline]
    fn set_curr_min_version(&self, curr_min_version: u64) {
        self.curr_min_version_info
            .curr_min_version
            .store(curr_min_version, Ordering::Release);
    }

    #[inline]
    fn curr_min_version_timestamp(&self) -> i64 {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .load(Ordering::Acquire)
    }

    #[inline]
    fn set_curr_min_version_timestamp(&self, curr_min_version_timestamp: i64) {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .store(curr_min_version_timestamp, Ordering::Release);
    }

    /// `thread_waiting_threshold` means the maximum of the number of shared objects to be
    /// reclaimed under one thread. `min_version_cache_time_us` means the time
    /// interval(microsecond) to update minimum version cache.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcu_lookup_bench::hazard_epoch::HazardEpoch;
    ///
    /// let h = HazardEpoch::new(64, 200000);
    /// assert_eq!(h.hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn new(thread_waiting_threshold: i64, min_version_cache_time_us: i64) -> HazardEpoch {
        let threads = (0..MAX_THREAD_COUNT)
            .map(|_| ThreadStore::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        HazardEpoch {
            thread_waiting_threshold,
            min_version_cache_time_us,
            version: WrappedAlign64Type(AtomicU64::new(0)),
            thread_lock: WrappedAlign64Type(SpinLock::new()),
            threads,
            thread_list: AtomicPtr::new(ptr::null_mut()),
            thread_count: AtomicI64::new(0),
            hazard_waiting_count: WrappedAlign64Type(AtomicI64::new(0)),
            curr_min_version_info: Default::default(),
        }
    }

    /// Reclaim all shared objects that no reader can still see.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcu_lookup_bench::hazard_epoch::{BaseHazardNode, HazardEpoch};
    ///
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(BaseHazardNode::default()));
    /// unsafe { h.add_node(node).unwrap(); }
    /// assert_eq!(h.hazard_waiting_count(), 1);
    /// h.retire();
    /// assert_eq!(h.hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn retire(&self) {
        let ts = match self.get_thread_store() {
            Ok(ts) => ts,
            Err(e) => {
                warn!("get_thread_store fail, ret={}", e);
                return;
            }
        };
        let min_version = self.get_min_version(true);
        let retire_count = unsafe { ts.retire(min_version, ts) };
        self.hazard_waiting_count
            .fetch_sub(retire_count, Ordering::AcqRel);

        let mut iter = self.atomic_load_thread_list();
        while !iter.is_null() {
            let other = unsafe { &*iter };
            if !ptr::eq(other, ts) {
                let retire_count = unsafe { other.retire(min_version, ts) };
                self.hazard_waiting_count
                    .fetch_sub(retire_count, Ordering::AcqRel);
            }
            iter = other.next();
        }
    }

    /// Hand `node` over for destruction once every reader that could have seen it has released.
    /// `node` can be any type as long as it implements trait `HazardNodeT`.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw`, already be unlinked from every shared structure,
    /// and must not be added twice.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcu_lookup_bench::hazard_epoch::{BaseHazardNode, HazardEpoch, HazardNodeT};
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    ///
    /// struct Node {
    ///     base: BaseHazardNode,
    ///     cnt: Arc<AtomicUsize>,
    /// }
    ///
    /// impl Drop for Node {
    ///     fn drop(&mut self) {
    ///         self.cnt.fetch_add(10, Ordering::SeqCst);
    ///     }
    /// }
    ///
    /// impl HazardNodeT for Node {
    ///     fn get_base_hazard_node(&self) -> &BaseHazardNode {
    ///         &self.base
    ///     }
    /// }
    ///
    /// let cnt = Arc::new(AtomicUsize::new(0));
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(Node {
    ///     base: Default::default(),
    ///     cnt: cnt.clone(),
    /// }));
    /// unsafe { h.add_node(node).unwrap(); }
    /// drop(h);
    /// assert_eq!(cnt.load(Ordering::SeqCst), 10);
    /// ```
    ///
    #[inline]
    pub unsafe fn add_node<T>(&self, node: *mut T) -> Result<(), EpochError>
    where
        T: HazardNodeT,
    {
        if node.is_null() {
            warn!("node is null");
            return Err(EpochError::InvalidParam);
        }
        let ts = self.get_thread_store().map_err(|e| {
            warn!("get_thread_store fail, ret={}", e);
            e
        })?;
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        ts.add_node(version, node);
        self.hazard_waiting_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    #[inline]
    fn atomic_load_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Before accessing a shared object, call method `acquire` to get the `handle` of this
    /// operation. Prefer `read_guard`, which releases automatically.
    ///
    /// # Examples
    ///
    /// ```
    /// use rcu_lookup_bench::hazard_epoch::HazardEpoch;
    /// use rcu_lookup_bench::error::EpochError;
    ///
    /// let h = HazardEpoch::default();
    /// let handle = h.acquire().unwrap();
    /// assert_eq!(h.acquire(), Err(EpochError::Busy));
    /// unsafe { h.release(handle); }
    /// ```
    ///
    pub fn acquire(&self) -> Result<u64, EpochError> {
        let ts = self.get_thread_store().map_err(|e| {
            warn!("get_thread_store fail, ret={}", e);
            e
        })?;
        loop {
            let version = self.atomic_load_version();
            let version_handle = ts.acquire(version)?;
            if version != self.atomic_load_version() {
                ts.release(&version_handle);
            } else {
                return Ok(version_handle.ver_u64());
            }
        }
    }

    /// Enter a read-side critical section that ends when the returned guard is dropped.
    pub fn read_guard(&self) -> Result<EpochGuard<'_>, EpochError> {
        let handle = self.acquire()?;
        Ok(EpochGuard {
            epoch: self,
            handle,
            _not_send: PhantomData,
        })
    }

    /// Atomic load count of thread
    #[inline]
    fn atomic_load_thread_count(&self) -> i64 {
        self.thread_count.load(Ordering::Acquire)
    }

    /// After accessing a shared object, call method `release` to trigger reclaiming.
    ///
    /// # Safety
    ///
    /// `handle` must have been returned by `acquire` on this thread and not released yet.
    #[inline]
    pub unsafe fn release(&self, handle: u64) {
        let version_handle = VersionHandle::new(handle);
        let tid = version_handle.tid() as usize;
        if MAX_THREAD_COUNT > tid {
            let ts = &self.threads[tid];
            ts.release(&version_handle);
            if self.thread_waiting_threshold < ts.get_hazard_waiting_count() {
                let min_version = self.get_min_version(false);
                let retire_count = ts.retire(min_version, ts);
                self.hazard_waiting_count
                    .fetch_sub(retire_count, Ordering::AcqRel);
            } else if self.atomic_load_thread_count() * self.thread_waiting_threshold
                < self.hazard_waiting_count()
            {
                self.retire();
            }
        }
    }

    /// Count of shared objects waiting to be reclaimed.
    #[inline]
    pub fn hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::Acquire)
    }

    fn get_thread_store(&self) -> Result<&ThreadStore, EpochError> {
        let tn = util::get_thread_id();
        if MAX_THREAD_COUNT <= tn {
            warn!("thread number overflow, tn={}", tn);
            return Err(EpochError::ThreadNumOverflow(tn));
        }
        let ts = &self.threads[tn];
        // different thread use different thread store.
        if !ts.is_enabled() {
            let _guard = self.thread_lock.lock_guard();
            ts.set_enabled(tn);
            ts.set_next(self.atomic_load_thread_list());
            self.thread_list
                .store(ts as *const _ as *mut ThreadStore, Ordering::Release);
            self.thread_count.fetch_add(1, Ordering::AcqRel);
            debug!("thread {} registered, thread_count={}", tn, self.atomic_load_thread_count());
        }
        Ok(ts)
    }

    #[inline]
    fn atomic_load_thread_list(&self) -> *mut ThreadStore {
        self.thread_list.load(Ordering::Acquire)
    }

    fn get_min_version(&self, force_flush: bool) -> u64 {
        let cached = self.curr_min_version();
        if !force_flush
            && 0 != cached
            && self.curr_min_version_timestamp() + self.min_version_cache_time_us
                > util::get_cur_microseconds_time()
        {
            return cached;
        }
        let mut ret = self.atomic_load_version();
        let mut iter = self.atomic_load_thread_list();
        while !iter.is_null() {
            let ts = unsafe { &*iter };
            let ts_min_version = ts.version();
            if ret > ts_min_version {
                ret = ts_min_version;
            }
            iter = ts.next();
        }
        self.set_curr_min_version(ret);
        self.set_curr_min_version_timestamp(util::get_cur_microseconds_time());
        ret
    }
}

/// A read-side critical section of a `HazardEpoch`. Objects retired after the guard was taken
/// stay alive until it is dropped.
pub struct EpochGuard<'a> {
    epoch: &'a HazardEpoch,
    handle: u64,
    _not_send: PhantomData<*mut ()>,
}

impl<'a> EpochGuard<'a> {
    /// The epoch this guard protects readers of.
    pub fn epoch(&self) -> &'a HazardEpoch {
        self.epoch
    }
}

impl<'a> fmt::Debug for EpochGuard<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpochGuard")
            .field("handle", &self.handle)
            .finish()
    }
}

impl<'a> Drop for EpochGuard<'a> {
    fn drop(&mut self) {
        unsafe { self.epoch.release(self.handle) }
    }
}
