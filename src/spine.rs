//! The stream spine: the ordered list of standard buffers with cumulative
//! offsets, and a per-thread cache of spine allocations.

use smallvec::SmallVec;
use std::cell::RefCell;

use crate::segment::SegmentBuffer;

/// One spine slot: a buffer plus the cumulative byte and segment totals
/// through this entry. Both cumulative fields are non-decreasing along the
/// spine.
pub struct SpineEntry {
    pub(crate) buffer: SegmentBuffer,
    pub(crate) end_offset: usize,
    pub(crate) end_segments: usize,
}

pub(crate) type Spine = SmallVec<[SpineEntry; 4]>;

/// Largest spine capacity worth caching.
const MAX_CACHED_CAPACITY: usize = 4096;
const SLOT_COUNT: usize = 13; // capacities 1 through 4096, by power of two

thread_local! {
    static SLOTS: RefCell<[Option<Spine>; SLOT_COUNT]> = RefCell::new(Default::default());
}

fn slot_for_desired(capacity: usize) -> usize {
    capacity.next_power_of_two().trailing_zeros() as usize
}

fn slot_for_stored(capacity: usize) -> usize {
    debug_assert!(capacity > 0);
    (usize::BITS - 1 - capacity.leading_zeros()) as usize
}

/// Takes a cached spine with capacity at least `desired`, walking slots from
/// the best fit upward; allocates fresh on a full miss.
pub(crate) fn take(desired: usize) -> Spine {
    let best = slot_for_desired(desired.max(1)).min(SLOT_COUNT - 1);
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        for slot in slots[best..].iter_mut() {
            if let Some(spine) = slot.take() {
                return spine;
            }
        }
        Spine::with_capacity(1 << best)
    })
}

/// Clears and stashes a spine for reuse on this thread. Spines that never
/// spilled to the heap, or whose slot is already occupied, are dropped.
pub(crate) fn store(mut spine: Spine) {
    spine.clear();
    if !spine.spilled() || spine.capacity() > MAX_CACHED_CAPACITY {
        return;
    }
    let slot = slot_for_stored(spine.capacity()).min(SLOT_COUNT - 1);
    SLOTS.with(|slots| {
        let mut slots = slots.borrow_mut();
        if slots[slot].is_none() {
            slots[slot] = Some(spine);
        }
    });
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slot_mapping_is_power_of_two() {
        assert_eq!(slot_for_desired(1), 0);
        assert_eq!(slot_for_desired(2), 1);
        assert_eq!(slot_for_desired(3), 2);
        assert_eq!(slot_for_desired(4), 2);
        assert_eq!(slot_for_desired(5), 3);
        assert_eq!(slot_for_stored(4), 2);
        assert_eq!(slot_for_stored(7), 2);
        assert_eq!(slot_for_stored(8), 3);
    }

    #[test]
    fn stored_spines_come_back_cleared() {
        let small = crate::small::pool();
        let class = small.class_for(1).unwrap();
        let mut spine = take(9);
        assert!(spine.capacity() >= 9);
        let capacity = spine.capacity();
        for _ in 0..5 {
            spine.push(SpineEntry {
                buffer: crate::segment::SegmentBuffer::raw(small.rent(class, false), class),
                end_offset: 0,
                end_segments: 0,
            });
        }
        store(spine);
        let again = take(9);
        assert!(again.is_empty());
        assert_eq!(again.capacity(), capacity);
    }

    #[test]
    fn inline_spines_are_not_cached() {
        let spine = Spine::new();
        store(spine);
        let fresh = take(1);
        assert!(fresh.is_empty());
    }
}
