//! The small-buffer pool: per-size-class caches of contiguous arrays used
//! by streams that have not yet grown into standard segments.
//!
//! Each class keeps two single-slot caches, one for buffers of unknown
//! content and one for buffers known to be zero-filled. The fast path is a
//! single compare-and-swap against an empty slot; misses fall through to a
//! mutexed per-class vector.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::segment::SEGMENT_SIZE;

const POOL_LOCK: &str = "small buffer pool lock poisoned";

/// Size classes, fixed at startup from the OS page size: page-size
/// multiples when pages are large relative to a segment, powers of two
/// otherwise, always strictly below [`SEGMENT_SIZE`].
fn compute_classes() -> Vec<usize> {
    let page = page_size();
    let mut classes = Vec::new();
    if page > SEGMENT_SIZE / 8 {
        let mut size = page;
        while size < SEGMENT_SIZE {
            classes.push(size);
            size += page;
        }
    } else {
        let mut size = page.next_power_of_two();
        while size < SEGMENT_SIZE {
            classes.push(size);
            size *= 2;
        }
    }
    classes
}

#[cfg(unix)]
pub(crate) fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as usize
    } else {
        4096
    }
}

#[cfg(not(unix))]
pub(crate) fn page_size() -> usize {
    4096
}

/// A single-slot buffer cache. Holds at most one buffer of a fixed,
/// class-determined size; the pointer is thin because the length is always
/// the class size.
struct Slot(AtomicPtr<u8>);

impl Slot {
    const fn empty() -> Self {
        Slot(AtomicPtr::new(ptr::null_mut()))
    }

    fn take(&self, len: usize) -> Option<Box<[u8]>> {
        let p = self.0.swap(ptr::null_mut(), Ordering::AcqRel);
        if p.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(p, len)) })
        }
    }

    fn try_put(&self, buffer: Box<[u8]>) -> Result<(), Box<[u8]>> {
        let len = buffer.len();
        let p = Box::into_raw(buffer) as *mut u8;
        match self
            .0
            .compare_exchange(ptr::null_mut(), p, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(p, len)) }),
        }
    }
}

struct ClassSlots {
    plain: Slot,
    zeroed: Slot,
}

pub struct SmallBufferPool {
    classes: Vec<usize>,
    slots: Vec<ClassSlots>,
    fallback: Vec<Mutex<Vec<Box<[u8]>>>>,
}

static POOL: Lazy<SmallBufferPool> = Lazy::new(SmallBufferPool::new);

/// The process-wide small-buffer pool.
pub fn pool() -> &'static SmallBufferPool {
    &POOL
}

impl SmallBufferPool {
    fn new() -> Self {
        let classes = compute_classes();
        let slots = classes
            .iter()
            .map(|_| ClassSlots {
                plain: Slot::empty(),
                zeroed: Slot::empty(),
            })
            .collect();
        let fallback = classes.iter().map(|_| Mutex::new(Vec::new())).collect();
        Self {
            classes,
            slots,
            fallback,
        }
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    /// The smallest class holding at least `bytes`, if any.
    pub fn class_for(&self, bytes: usize) -> Option<usize> {
        self.classes.iter().position(|&size| size >= bytes)
    }

    pub fn largest_class(&self) -> usize {
        self.classes.last().copied().unwrap_or(0)
    }

    /// Rents a buffer of exactly the class size. With `zero_required` the
    /// returned bytes are all zero.
    pub fn rent(&self, class: usize, zero_required: bool) -> Box<[u8]> {
        let size = self.classes[class];
        let slots = &self.slots[class];
        if zero_required {
            if let Some(buffer) = slots.zeroed.take(size) {
                return buffer;
            }
            if let Some(mut buffer) = slots.plain.take(size) {
                buffer.fill(0);
                return buffer;
            }
        } else {
            if let Some(buffer) = slots.plain.take(size) {
                return buffer;
            }
            if let Some(buffer) = slots.zeroed.take(size) {
                return buffer;
            }
        }
        if let Some(mut buffer) = self.fallback[class].lock().expect(POOL_LOCK).pop() {
            if zero_required {
                buffer.fill(0);
            }
            return buffer;
        }
        // fresh allocations are zero-filled already
        vec![0u8; size].into_boxed_slice()
    }

    /// Returns a buffer to its class, zeroing first when the release policy
    /// says so. The zeroed slot is only ever fed buffers zeroed here.
    pub fn return_buffer(&self, mut buffer: Box<[u8]>, class: usize, zero: bool) {
        debug_assert_eq!(buffer.len(), self.classes[class]);
        if zero {
            buffer.fill(0);
        }
        let slots = &self.slots[class];
        let slot = if zero { &slots.zeroed } else { &slots.plain };
        if let Err(buffer) = slot.try_put(buffer) {
            self.fallback[class].lock().expect(POOL_LOCK).push(buffer);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classes_are_ascending_and_below_segment_size() {
        let pool = pool();
        let classes = pool.classes();
        assert!(!classes.is_empty());
        for window in classes.windows(2) {
            assert!(window[0] < window[1]);
        }
        assert!(*classes.last().unwrap() < SEGMENT_SIZE);
        assert_eq!(pool.largest_class(), *classes.last().unwrap());
    }

    #[test]
    fn class_lookup_picks_the_smallest_fit() {
        let pool = pool();
        let classes = pool.classes();
        assert_eq!(pool.class_for(1), Some(0));
        assert_eq!(pool.class_for(classes[0]), Some(0));
        if classes.len() > 1 {
            assert_eq!(pool.class_for(classes[0] + 1), Some(1));
        }
        assert_eq!(pool.class_for(SEGMENT_SIZE), None);
    }

    #[test]
    fn rented_buffers_have_the_class_size() {
        let pool = pool();
        for (class, &size) in pool.classes().iter().enumerate() {
            let buffer = pool.rent(class, false);
            assert_eq!(buffer.len(), size);
            pool.return_buffer(buffer, class, false);
        }
    }

    #[test]
    fn zero_required_rents_are_zero_filled() {
        let pool = pool();
        let class = pool.class_for(1).unwrap();
        // dirty a buffer and put it back without zeroing
        let mut buffer = pool.rent(class, false);
        buffer.fill(0xA5);
        pool.return_buffer(buffer, class, false);
        // every path back out with zero_required must produce zeros
        let buffer = pool.rent(class, true);
        assert!(buffer.iter().all(|&b| b == 0));
        pool.return_buffer(buffer, class, false);
    }

    #[test]
    fn single_slot_caches_hold_exactly_one_buffer() {
        let slot = Slot::empty();
        assert!(slot.take(8).is_none());
        slot.try_put(vec![1u8; 8].into_boxed_slice()).unwrap();
        // occupied: the second put is handed back
        let rejected = slot.try_put(vec![2u8; 8].into_boxed_slice());
        assert_eq!(rejected.unwrap_err()[0], 2);
        let got = slot.take(8).unwrap();
        assert_eq!(&got[..], &[1u8; 8][..]);
        assert!(slot.take(8).is_none());
    }

    #[test]
    fn buffers_survive_the_round_trip_through_the_pool() {
        let pool = pool();
        let class = pool.class_for(1).unwrap();
        let a = pool.rent(class, false);
        let b = pool.rent(class, false);
        let c = pool.rent(class, false);
        pool.return_buffer(a, class, false);
        pool.return_buffer(b, class, false);
        pool.return_buffer(c, class, false);
        for _ in 0..3 {
            let buffer = pool.rent(class, false);
            assert_eq!(buffer.len(), pool.classes()[class]);
            pool.return_buffer(buffer, class, false);
        }
    }
}
