use crate::error::EpochError;
use crate::util::{self, WrappedAlign64Type};
use std::cell::Cell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};

const TID_MASK: u64 = 0xffff;
const HIGH_BITS_SHIFT: u32 = 16;
const SEQ_SHIFT: u32 = 32;

#[derive(Debug)]
struct SeqVersion {
    seq: AtomicU32,
    version: AtomicU64,
}

impl Default for SeqVersion {
    fn default() -> Self {
        SeqVersion {
            seq: AtomicU32::new(0),
            version: AtomicU64::new(u64::MAX),
        }
    }
}

/// Packed `{tid: u16, high_bits: u16, seq: u32}` identifying one read-side critical section.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionHandle {
    data: u64,
}

impl VersionHandle {
    pub fn ver_u64(&self) -> u64 {
        self.data
    }

    pub fn new(uv: u64) -> VersionHandle {
        VersionHandle { data: uv }
    }

    #[inline]
    fn set_tid(&mut self, tid: u16) {
        self.data = (self.data & !TID_MASK) | u64::from(tid);
    }

    #[inline]
    pub fn tid(&self) -> u16 {
        (self.data & TID_MASK) as u16
    }

    #[inline]
    fn set_high_bits(&mut self, high_bits: u16) {
        self.data = (self.data & !(TID_MASK << HIGH_BITS_SHIFT))
            | (u64::from(high_bits) << HIGH_BITS_SHIFT);
    }

    #[inline]
    fn seq(&self) -> u32 {
        (self.data >> SEQ_SHIFT) as u32
    }

    #[inline]
    fn set_seq(&mut self, seq: u32) {
        self.data = (self.data & 0xffff_ffff) | (u64::from(seq) << SEQ_SHIFT);
    }
}

/// Implemented by every object that can be handed to `HazardEpoch::add_node`. The object embeds a
/// `BaseHazardNode`, which links it into the waiting list until it is safe to destroy.
pub trait HazardNodeT {
    fn get_base_hazard_node(&self) -> &BaseHazardNode;
}

/// Intrusive header of a retired object: waiting list link, retire version and the destructor
/// of the enclosing allocation.
pub struct BaseHazardNode {
    reclaim: Cell<Option<unsafe fn(*mut u8)>>,
    obj: Cell<*mut u8>,
    next: Cell<*mut BaseHazardNode>,
    version: Cell<u64>,
}

impl Default for BaseHazardNode {
    fn default() -> Self {
        BaseHazardNode {
            reclaim: Cell::new(None),
            obj: Cell::new(ptr::null_mut()),
            next: Cell::new(ptr::null_mut()),
            version: Cell::new(u64::MAX),
        }
    }
}

impl fmt::Debug for BaseHazardNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseHazardNode")
            .field("version", &self.version.get())
            .field("next", &self.next.get())
            .finish()
    }
}

impl HazardNodeT for BaseHazardNode {
    fn get_base_hazard_node(&self) -> &BaseHazardNode {
        self
    }
}

unsafe fn reclaim_boxed<T>(obj: *mut u8) {
    drop(Box::from_raw(obj as *mut T));
}

impl BaseHazardNode {
    #[inline]
    fn next(&self) -> *mut BaseHazardNode {
        self.next.get()
    }

    #[inline]
    fn version(&self) -> u64 {
        self.version.get()
    }

    #[inline]
    fn set_version(&self, version: u64) {
        self.version.set(version);
    }

    #[inline]
    fn set_next(&self, next: *mut BaseHazardNode) {
        debug_assert_ne!(next, self as *const _ as *mut _);
        self.next.set(next);
    }

    /// Remember how to free the `Box<T>` this header lives in.
    #[inline]
    fn set_owner<T>(&self, obj: *mut T) {
        self.obj.set(obj as *mut u8);
        self.reclaim.set(Some(reclaim_boxed::<T>));
    }

    #[inline]
    fn as_ptr(&self) -> *mut BaseHazardNode {
        self as *const _ as *mut BaseHazardNode
    }
}

/// Per thread slot of a `HazardEpoch`: the version of the critical section the thread is in (if
/// any) and the list of nodes it retired that are still waiting for readers to move on.
#[derive(Debug)]
pub struct ThreadStore {
    enabled: AtomicBool,
    tid: AtomicUsize,
    last_retire_version: AtomicU64,
    curr_seq_version: WrappedAlign64Type<SeqVersion>,
    hazard_waiting_list: WrappedAlign64Type<AtomicPtr<BaseHazardNode>>,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    next: WrappedAlign64Type<AtomicPtr<ThreadStore>>,
}

impl Default for ThreadStore {
    fn default() -> Self {
        ThreadStore::new()
    }
}

impl ThreadStore {
    fn new() -> ThreadStore {
        ThreadStore {
            enabled: AtomicBool::new(false),
            tid: AtomicUsize::new(0),
            last_retire_version: AtomicU64::new(0),
            curr_seq_version: Default::default(),
            hazard_waiting_list: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
            hazard_waiting_count: Default::default(),
            next: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
        }
    }

    pub fn set_enabled(&self, tid: usize) {
        self.tid.store(tid, Ordering::Relaxed);
        self.enabled.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn tid(&self) -> usize {
        self.tid.load(Ordering::Relaxed)
    }

    pub fn set_next(&self, next: *mut ThreadStore) {
        self.next.store(next, Ordering::Release);
    }

    pub fn next(&self) -> *mut ThreadStore {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    fn curr_seq(&self) -> u32 {
        self.curr_seq_version.seq.load(Ordering::Relaxed)
    }

    #[inline]
    fn inc_curr_seq(&self) {
        self.curr_seq_version.seq.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn curr_version(&self) -> u64 {
        self.curr_seq_version.version.load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_version(&self, version: u64) {
        self.curr_seq_version.version.store(version, Ordering::SeqCst);
    }

    pub fn acquire(&self, version: u64) -> Result<VersionHandle, EpochError> {
        debug_assert_eq!(self.tid(), util::get_thread_id());
        if u64::MAX != self.curr_version() {
            warn!(
                "current thread has already assigned a version handle, seq={}",
                self.curr_seq()
            );
            return Err(EpochError::Busy);
        }
        self.set_curr_version(version);
        let mut handle = VersionHandle::new(0);
        handle.set_tid(self.tid() as u16);
        handle.set_high_bits(0);
        handle.set_seq(self.curr_seq());
        Ok(handle)
    }

    pub fn release(&self, handle: &VersionHandle) {
        debug_assert_eq!(self.tid(), util::get_thread_id());
        if self.tid() as u16 != handle.tid() || self.curr_seq() != handle.seq() {
            warn!("invalid handle seq={}, tid={}", handle.seq(), handle.tid());
        } else {
            self.set_curr_version(u64::MAX);
            self.inc_curr_seq();
        }
    }

    /// Queue `node` for destruction once no reader holds a version older than `version`.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw`, be unreachable for readers that start after this
    /// call, and not be added twice.
    pub unsafe fn add_node<T>(&self, version: u64, node: *mut T)
    where
        T: HazardNodeT,
    {
        debug_assert_eq!(self.tid(), util::get_thread_id());
        let base = (*node).get_base_hazard_node();
        base.set_owner(node);
        base.set_version(version);
        let base = base.as_ptr();
        self.inner_add_nodes(base, base, 1);
    }

    pub fn get_hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::Acquire)
    }

    /// Destroy every waiting node whose version is `<= version` and hand the rest over to
    /// `node_receiver`. Returns the number of destroyed nodes.
    ///
    /// # Safety
    ///
    /// `version` must not exceed the smallest version held by any reader, and `node_receiver`
    /// must be the calling thread's own store.
    pub unsafe fn retire(&self, version: u64, node_receiver: &ThreadStore) -> i64 {
        debug_assert!(
            self as *const _ != node_receiver as *const _ || self.tid() == util::get_thread_id()
        );
        if self.last_retire_version.swap(version, Ordering::Relaxed) == version {
            return 0;
        }
        let mut curr = self.hazard_waiting_list.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut list_retire = ptr::null_mut::<BaseHazardNode>();
        let mut move_list_head = ptr::null_mut::<BaseHazardNode>();
        let mut move_list_tail = ptr::null_mut::<BaseHazardNode>();
        let mut move_count = 0i64;
        let mut retire_count = 0i64;
        while !curr.is_null() {
            let node = &*curr;
            let next = node.next();
            if node.version() <= version {
                retire_count += 1;
                node.set_next(list_retire);
                list_retire = curr;
            } else {
                move_count += 1;
                node.set_next(move_list_head);
                if move_list_head.is_null() {
                    move_list_tail = curr;
                }
                move_list_head = curr;
            }
            curr = next;
        }
        node_receiver.inner_add_nodes(move_list_head, move_list_tail, move_count);
        self.hazard_waiting_count
            .fetch_sub(move_count + retire_count, Ordering::AcqRel);
        while !list_retire.is_null() {
            let node_retire = list_retire;
            list_retire = (*list_retire).next();
            Self::retire_hazard_node(node_retire);
        }
        retire_count
    }

    unsafe fn retire_hazard_node(node_retire: *mut BaseHazardNode) {
        let node = &*node_retire;
        if let Some(reclaim) = node.reclaim.get() {
            reclaim(node.obj.get());
        }
    }

    pub fn version(&self) -> u64 {
        self.curr_version()
    }

    unsafe fn inner_add_nodes(&self, head: *mut BaseHazardNode, tail: *mut BaseHazardNode, count: i64) {
        if 0 < count {
            let mut old = self.hazard_waiting_list.load(Ordering::Acquire);
            loop {
                (*tail).set_next(old);
                match self.hazard_waiting_list.compare_exchange_weak(
                    old,
                    head,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(curr) => old = curr,
                }
            }
            self.hazard_waiting_count.fetch_add(count, Ordering::AcqRel);
        }
    }

    fn destroy(&mut self) {
        let mut curr = *self.hazard_waiting_list.get_mut();
        *self.hazard_waiting_list.get_mut() = ptr::null_mut();
        while !curr.is_null() {
            unsafe {
                let node_retire = curr;
                curr = (*curr).next();
                Self::retire_hazard_node(node_retire);
            }
        }
        *self.hazard_waiting_count.get_mut() = 0;
    }
}

impl Drop for ThreadStore {
    fn drop(&mut self) {
        self.destroy();
    }
}
