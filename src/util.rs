//! Small shared helpers: cache line alignment, per thread ids and wall-clock time.

use std::cell::Cell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);
static FREE_THREAD_IDS: Mutex<Vec<usize>> = Mutex::new(Vec::new());

struct ThreadIdSlot {
    id: usize,
}

impl ThreadIdSlot {
    fn acquire() -> ThreadIdSlot {
        let recycled = match FREE_THREAD_IDS.lock() {
            Ok(mut free) => free.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        };
        let id = recycled.unwrap_or_else(|| NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        ThreadIdSlot { id }
    }
}

impl Drop for ThreadIdSlot {
    fn drop(&mut self) {
        match FREE_THREAD_IDS.lock() {
            Ok(mut free) => free.push(self.id),
            Err(poisoned) => poisoned.into_inner().push(self.id),
        }
    }
}

thread_local! {
    static THREAD_ID: ThreadIdSlot = ThreadIdSlot::acquire();
    static CACHED_THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// Dense id of the calling thread, starting from 0.
///
/// Ids are handed back when a thread exits and reused by threads started later, so the number
/// of distinct ids in use never exceeds the number of live threads that asked for one.
pub fn get_thread_id() -> usize {
    CACHED_THREAD_ID.with(|cached| match cached.get() {
        Some(id) => id,
        None => {
            let id = THREAD_ID.with(|slot| slot.id);
            cached.set(Some(id));
            id
        }
    })
}

/// Wraps `T` so that it starts on its own 64 byte cache line.
#[repr(align(64))]
#[derive(Debug)]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Default for WrappedAlign64Type<T>
where
    T: Default,
{
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &<Self as Deref>::Target {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut <Self as Deref>::Target {
        &mut self.0
    }
}

pub fn get_cur_microseconds_time() -> i64 {
    let timespec = time::get_time();
    timespec.sec * 1_000_000 + timespec.nsec as i64 / 1_000
}

/// Current wall-clock second (seconds since the Unix epoch).
pub fn get_cur_seconds_time() -> i64 {
    time::get_time().sec
}

/// Sleep in 1us steps until the wall-clock second rolls over, then return the new second.
pub fn wait_next_second() -> i64 {
    let last = get_cur_seconds_time();
    let mut now = last;
    while now == last {
        thread::sleep(Duration::from_micros(1));
        now = get_cur_seconds_time();
    }
    now
}

#[inline]
pub fn pause() {
    hint::spin_loop();
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::mem;

    #[test]
    fn test_align() {
        assert_eq!(mem::align_of::<WrappedAlign64Type<u8>>(), 64);
        let v = vec![WrappedAlign64Type(1u64), WrappedAlign64Type(2u64)];
        let a = &v[0] as *const _ as usize;
        let b = &v[1] as *const _ as usize;
        assert_eq!(a % 64, 0);
        assert_eq!(b - a, 64);
    }

    #[test]
    fn test_thread_id_stable_and_distinct() {
        let mine = get_thread_id();
        assert_eq!(mine, get_thread_id());
        let others: HashSet<usize> = (0..4)
            .map(|_| thread::spawn(get_thread_id))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        assert!(!others.contains(&mine));
    }

    #[test]
    fn test_wait_next_second() {
        let before = get_cur_seconds_time();
        let after = wait_next_second();
        assert!(after > before);
        assert!(get_cur_microseconds_time() >= after * 1_000_000);
    }
}
