//! Read-copy-update hash table on top of `HazardEpoch`.
//!
//! The table has a fixed, power of two number of buckets, each holding a singly linked chain of
//! entries. Readers never lock: they enter a read-side critical section and walk the chain.
//! Writers are serialised by a spin lock, publish new entries with a release store of the link
//! that precedes them, and hand unlinked or replaced entries to the epoch, which destroys them
//! after every reader that could still see them has left its critical section.

use crate::error::EpochError;
use crate::hazard_epoch::{BaseHazardNode, EpochGuard, HazardEpoch, HazardNodeT};
use crate::spin_lock::SpinLock;
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Default number of buckets, matching the usual 64-bucket RCU table setup.
pub const DEFAULT_BUCKET_COUNT: usize = 64;

type EntryPtr<K, V> = *mut Entry<K, V>;

struct Entry<K, V> {
    base: BaseHazardNode,
    hash: u64,
    key: K,
    value: V,
    next: AtomicPtr<Entry<K, V>>,
}

impl<K, V> HazardNodeT for Entry<K, V> {
    fn get_base_hazard_node(&self) -> &BaseHazardNode {
        &self.base
    }
}

impl<K, V> Entry<K, V> {
    fn new(hash: u64, key: K, value: V, next: EntryPtr<K, V>) -> Self {
        Entry {
            base: BaseHazardNode::default(),
            hash,
            key,
            value,
            next: AtomicPtr::new(next),
        }
    }

    #[inline]
    fn next(&self) -> EntryPtr<K, V> {
        self.next.load(Ordering::Acquire)
    }
}

/// Lock-free-read hash table with deferred reclamation of removed entries.
pub struct RcuHashMap<K, V, S = RandomState> {
    buckets: Box<[AtomicPtr<Entry<K, V>>]>,
    mask: usize,
    len: AtomicUsize,
    write_lock: SpinLock,
    hasher: S,
    hazard_epoch: HazardEpoch,
}

unsafe impl<K: Send + Sync, V: Send + Sync, S: Send> Send for RcuHashMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for RcuHashMap<K, V, S> {}

impl<K, V> RcuHashMap<K, V, RandomState>
where
    K: Hash + Eq,
{
    /// Table with `DEFAULT_BUCKET_COUNT` buckets.
    pub fn new() -> Self {
        Self::build(DEFAULT_BUCKET_COUNT, RandomState::new())
    }

    /// Table with `bucket_count` buckets; fails unless `bucket_count` is a non-zero power of two.
    pub fn with_buckets(bucket_count: usize) -> Result<Self, EpochError> {
        Self::with_buckets_and_hasher(bucket_count, RandomState::new())
    }
}

impl<K, V> Default for RcuHashMap<K, V, RandomState>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> RcuHashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_buckets_and_hasher(bucket_count: usize, hasher: S) -> Result<Self, EpochError> {
        if !bucket_count.is_power_of_two() {
            warn!("bucket count must be a power of two, got {}", bucket_count);
            return Err(EpochError::InvalidParam);
        }
        Ok(Self::build(bucket_count, hasher))
    }

    fn build(bucket_count: usize, hasher: S) -> Self {
        let buckets = (0..bucket_count)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RcuHashMap {
            buckets,
            mask: bucket_count - 1,
            len: AtomicUsize::new(0),
            write_lock: SpinLock::new(),
            hasher,
            hazard_epoch: HazardEpoch::default(),
        }
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of live entries. Exact when no writer is running.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries unlinked but not destroyed yet.
    pub fn pending_reclaim(&self) -> i64 {
        self.hazard_epoch.hazard_waiting_count()
    }

    /// Destroy every unlinked entry that no reader can still see.
    pub fn reclaim(&self) {
        self.hazard_epoch.retire();
    }

    /// Enter a read-side critical section. References returned by `get` live as long as it does.
    /// Critical sections do not nest: while a guard is alive the same thread cannot call
    /// `contains_key`, `insert_or_replace` or `remove`, which take one of their own.
    pub fn read_lock(&self) -> Result<EpochGuard<'_>, EpochError> {
        self.hazard_epoch.read_guard()
    }

    fn hash<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let mut state = self.hasher.build_hasher();
        key.hash(&mut state);
        state.finish()
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &AtomicPtr<Entry<K, V>> {
        &self.buckets[(hash as usize) & self.mask]
    }

    /// Look `key` up inside the critical section held by `guard`.
    pub fn get<'g, Q>(&'g self, guard: &'g EpochGuard<'_>, key: &Q) -> Option<&'g V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        assert!(
            ptr::eq(guard.epoch(), &self.hazard_epoch),
            "guard belongs to another table"
        );
        let hash = self.hash(key);
        let mut cur = self.bucket(hash).load(Ordering::Acquire);
        while !cur.is_null() {
            let entry = unsafe { &*cur };
            if entry.hash == hash && entry.key.borrow() == key {
                return Some(&entry.value);
            }
            cur = entry.next();
        }
        None
    }

    /// Whether `key` is present, checked in a critical section of its own.
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool, EpochError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = self.read_lock()?;
        Ok(self.get(&guard, key).is_some())
    }

    /// Add `key` or replace the entry already holding it. Returns true if an entry was replaced;
    /// the replaced entry is reclaimed after a grace period.
    pub fn insert_or_replace(&self, key: K, value: V) -> Result<bool, EpochError> {
        let hash = self.hash(&key);
        let _write = self.write_lock.lock_guard();
        let _guard = self.read_lock()?;
        let bucket = self.bucket(hash);

        let mut link = bucket;
        let mut cur = link.load(Ordering::Acquire);
        while !cur.is_null() {
            let entry = unsafe { &*cur };
            if entry.hash == hash && entry.key == key {
                let node = Box::into_raw(Box::new(Entry::new(hash, key, value, entry.next())));
                link.store(node, Ordering::Release);
                unsafe { self.hazard_epoch.add_node(cur)? };
                return Ok(true);
            }
            link = &entry.next;
            cur = entry.next();
        }

        let head = bucket.load(Ordering::Acquire);
        let node = Box::into_raw(Box::new(Entry::new(hash, key, value, head)));
        bucket.store(node, Ordering::Release);
        self.len.fetch_add(1, Ordering::Relaxed);
        Ok(false)
    }

    /// Unlink `key`. Returns false if it was not present. The entry is reclaimed after a grace
    /// period.
    pub fn remove<Q>(&self, key: &Q) -> Result<bool, EpochError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash(key);
        let _write = self.write_lock.lock_guard();
        let _guard = self.read_lock()?;

        let mut link = self.bucket(hash);
        let mut cur = link.load(Ordering::Acquire);
        while !cur.is_null() {
            let entry = unsafe { &*cur };
            if entry.hash == hash && entry.key.borrow() == key {
                link.store(entry.next(), Ordering::Release);
                self.len.fetch_sub(1, Ordering::Relaxed);
                unsafe { self.hazard_epoch.add_node(cur)? };
                return Ok(true);
            }
            link = &entry.next;
            cur = entry.next();
        }
        Ok(false)
    }
}

impl<K, V, S> fmt::Debug for RcuHashMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuHashMap")
            .field("buckets", &self.buckets.len())
            .field("len", &self.len.load(Ordering::Relaxed))
            .field("hazard_epoch", &self.hazard_epoch)
            .finish()
    }
}

impl<K, V, S> Drop for RcuHashMap<K, V, S> {
    fn drop(&mut self) {
        for bucket in self.buckets.iter_mut() {
            let mut head = *bucket.get_mut();
            *bucket.get_mut() = ptr::null_mut();
            while !head.is_null() {
                head = unsafe { Box::from_raw(head) }.next.into_inner();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::RcuHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counted {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_base() {
        let map = RcuHashMap::new();
        assert!(!map.contains_key(&1u32).unwrap());
        assert!(!map.insert_or_replace(1u32, 10u32).unwrap());
        assert!(map.contains_key(&1u32).unwrap());
        {
            let guard = map.read_lock().unwrap();
            assert_eq!(map.get(&guard, &1), Some(&10));
        }
        assert!(map.insert_or_replace(1, 11).unwrap());
        {
            let guard = map.read_lock().unwrap();
            assert_eq!(map.get(&guard, &1), Some(&11));
        }
        assert_eq!(map.len(), 1);
        assert!(map.remove(&1).unwrap());
        assert!(!map.remove(&1).unwrap());
        assert!(!map.contains_key(&1).unwrap());
        assert!(map.is_empty());
    }

    #[test]
    fn test_collisions_in_one_bucket() {
        let map = RcuHashMap::with_buckets(1).unwrap();
        for k in 0..32u32 {
            map.insert_or_replace(k, k * 2).unwrap();
        }
        for k in (0..32u32).step_by(2) {
            assert!(map.remove(&k).unwrap());
        }
        let guard = map.read_lock().unwrap();
        for k in 0..32u32 {
            let expected = if k % 2 == 0 { None } else { Some(k * 2) };
            assert_eq!(map.get(&guard, &k).copied(), expected);
        }
    }

    #[test]
    fn test_bad_bucket_count() {
        assert!(RcuHashMap::<u32, u32>::with_buckets(0).is_err());
        assert!(RcuHashMap::<u32, u32>::with_buckets(48).is_err());
        assert_eq!(RcuHashMap::<u32, u32>::with_buckets(16).unwrap().bucket_count(), 16);
    }

    #[test]
    fn test_deferred_until_reader_leaves() {
        let drops = Arc::new(AtomicUsize::new(0));
        let map = RcuHashMap::new();
        map.insert_or_replace(
            7u32,
            Counted {
                drops: drops.clone(),
            },
        )
        .unwrap();

        let guard = map.read_lock().unwrap();
        let seen = map.get(&guard, &7).unwrap();
        // remove from a writer thread while this thread still holds the entry
        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(map.remove(&7).unwrap());
                map.reclaim();
            });
        });
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(seen.drops.load(Ordering::SeqCst), 0);
        drop(guard);

        map.reclaim();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(map.pending_reclaim(), 0);
    }

    #[test]
    fn test_drop_frees_live_and_pending() {
        let drops = Arc::new(AtomicUsize::new(0));
        let map = RcuHashMap::new();
        for k in 0..10u32 {
            map.insert_or_replace(
                k,
                Counted {
                    drops: drops.clone(),
                },
            )
            .unwrap();
        }
        let guard = map.read_lock().unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                for k in 0..5u32 {
                    assert!(map.remove(&k).unwrap());
                }
            });
        });
        assert_eq!(map.pending_reclaim(), 5);
        drop(guard);
        drop(map);
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }
}
