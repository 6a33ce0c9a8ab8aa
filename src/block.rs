//! A buffer block: one large backing allocation subdivided into fixed-size
//! segments, with lock-free rent/return of contiguous segment runs.
//!
//! Backing memory comes either from the global allocator or from the OS
//! directly (`mmap` on unix), chosen per pool at construction. Segment state
//! lives in two atomic bitmaps: `rented` marks segments handed out, `zeroed`
//! marks free segments whose bytes are known to be zero. A free segment is
//! dirty unless its zeroed bit is set; the zeroed bit is meaningless while a
//! segment is rented.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::bits::AtomicBitwise;
use crate::error::PoolError;
use crate::segment::{SegmentBuffer, SEGMENT_SIZE};

/// Segments per block. One bitmap word covers the whole block, so a run
/// claim is a single compare-and-swap.
pub const BLOCK_SEGMENTS: usize = 64;
/// Bytes per block.
pub const BLOCK_BYTES: usize = BLOCK_SEGMENTS * SEGMENT_SIZE;

const BLOCK_ALIGN: usize = 64;

pub struct BufferBlock {
    base: NonNull<u8>,
    native: bool,
    rented: AtomicU64,
    zeroed: AtomicU64,
    generation: AtomicU32,
    pool_id: u64,
    _c: countme::Count<Self>,
}

// The raw base pointer is shared between threads; bytes of a segment are
// only touched by the holder of its rented bit, which is claimed and
// released through atomic bitmap transitions.
unsafe impl Send for BufferBlock {}
unsafe impl Sync for BufferBlock {}

impl BufferBlock {
    pub(crate) fn new(native: bool, pool_id: u64) -> Result<Self, PoolError> {
        let base = if native {
            native_alloc(BLOCK_BYTES)?
        } else {
            managed_alloc(BLOCK_BYTES)?
        };
        Ok(Self {
            base,
            native,
            rented: AtomicU64::new(0),
            // both backings hand the block out zero-filled
            zeroed: AtomicU64::new(u64::MAX),
            generation: AtomicU32::new(0),
            pool_id,
            _c: countme::Count::new(),
        })
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub(crate) fn is_native(&self) -> bool {
        self.native
    }

    /// Number of segments currently rented out.
    pub fn rented_segments(&self) -> usize {
        self.rented.load(Ordering::Acquire).count_ones() as usize
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    /// True when no segment of `[start, start + segments)` is rented.
    pub fn is_run_free(&self, start: usize, segments: usize) -> bool {
        self.rented.load(Ordering::Acquire) & run_mask(start, segments) == 0
    }

    pub(crate) fn segment_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < BLOCK_SEGMENTS);
        unsafe { self.base.as_ptr().add(index * SEGMENT_SIZE) }
    }

    /// Claims the lowest-index run of `segments` consecutive free segments.
    ///
    /// Returns `None` when no such run exists in this block. If
    /// `zero_required`, any segment of the claimed run not already marked
    /// zeroed is zero-filled before the handle is returned.
    pub(crate) fn try_rent_run(
        self: &Arc<Self>,
        segments: usize,
        zero_required: bool,
    ) -> Option<SegmentBuffer> {
        debug_assert!(segments >= 1 && segments <= BLOCK_SEGMENTS);
        loop {
            let current = self.rented.load(Ordering::Acquire);
            let start = find_zero_run(current, segments)?;
            let mask = run_mask(start, segments);
            if self.claim(mask, zero_required) {
                return Some(SegmentBuffer::segmented(Arc::clone(self), start, segments));
            }
            // lost the race for this candidate, rescan
        }
    }

    /// Claims exactly the run `[start, start + segments)`, or nothing.
    ///
    /// Used to extend an existing run in place, so the caller can grow a
    /// buffer without a new spine entry.
    pub(crate) fn try_rent_run_at(
        self: &Arc<Self>,
        start: usize,
        segments: usize,
        zero_required: bool,
    ) -> Option<SegmentBuffer> {
        if segments == 0 || start + segments > BLOCK_SEGMENTS {
            return None;
        }
        let mask = run_mask(start, segments);
        if self.claim(mask, zero_required) {
            Some(SegmentBuffer::segmented(Arc::clone(self), start, segments))
        } else {
            None
        }
    }

    /// Marks the run free. With `zero`, the bytes are zero-filled and the
    /// run re-enters the free-clean state; otherwise the zeroed bits stay
    /// clear and the run is free-dirty.
    pub(crate) fn return_run(&self, start: usize, segments: usize, zero: bool) {
        let mask = run_mask(start, segments);
        debug_assert_eq!(self.rented.load(Ordering::Acquire) & mask, mask);
        if zero {
            // still exclusively ours: zero before publishing the free bits
            self.zero_run(start, segments, mask);
            self.zeroed.set_bits(mask);
        }
        let (prior, _) = self.rented.clear_bits(mask);
        debug_assert_eq!(prior & mask, mask);
    }

    /// Keeps the first `keep` segments of a rented run and releases the
    /// tail, with the same semantics as [`return_run`] for the tail.
    pub(crate) fn reduce_run(&self, start: usize, segments: usize, keep: usize, zero: bool) {
        debug_assert!(keep < segments);
        self.return_run(start + keep, segments - keep, zero);
    }

    fn claim(&self, mask: u64, zero_required: bool) -> bool {
        let (prior, _) = self.rented.or_if(|w| w & mask == 0, mask);
        if prior & mask != 0 {
            return false;
        }
        self.generation.fetch_add(1, Ordering::Relaxed);
        let (was_zeroed, _) = self.zeroed.clear_bits(mask);
        if zero_required && was_zeroed & mask != mask {
            let dirty = mask & !was_zeroed;
            self.zero_segments(dirty);
        }
        true
    }

    fn zero_run(&self, start: usize, segments: usize, mask: u64) {
        let _ = mask;
        unsafe {
            std::ptr::write_bytes(self.segment_ptr(start), 0, segments * SEGMENT_SIZE);
        }
    }

    fn zero_segments(&self, mut mask: u64) {
        while mask != 0 {
            let index = mask.trailing_zeros() as usize;
            unsafe {
                std::ptr::write_bytes(self.segment_ptr(index), 0, SEGMENT_SIZE);
            }
            mask &= mask - 1;
        }
    }
}

impl Drop for BufferBlock {
    fn drop(&mut self) {
        debug_assert_eq!(self.rented.load(Ordering::Acquire), 0);
        if self.native {
            native_free(self.base, BLOCK_BYTES);
        } else {
            unsafe { alloc::dealloc(self.base.as_ptr(), block_layout(BLOCK_BYTES)) };
        }
    }
}

/// Mask covering the run `[start, start + segments)`.
pub(crate) fn run_mask(start: usize, segments: usize) -> u64 {
    debug_assert!(segments >= 1 && start + segments <= 64);
    if segments == 64 {
        u64::MAX
    } else {
        ((1u64 << segments) - 1) << start
    }
}

/// Lowest starting index of a run of `count` zero bits in `word`, if any.
pub(crate) fn find_zero_run(word: u64, count: usize) -> Option<usize> {
    debug_assert!(count >= 1 && count <= 64);
    // shift-doubling over the inverted word: after the loop, a set bit at i
    // means bits [i, i + count) are all free
    let mut runs = !word;
    let mut have = 1;
    while have < count && runs != 0 {
        let shift = (count - have).min(have);
        runs &= runs >> shift;
        have += shift;
    }
    if runs == 0 {
        None
    } else {
        Some(runs.trailing_zeros() as usize)
    }
}

fn block_layout(len: usize) -> Layout {
    Layout::from_size_align(len, BLOCK_ALIGN).expect("valid block layout")
}

fn managed_alloc(len: usize) -> Result<NonNull<u8>, PoolError> {
    let ptr = unsafe { alloc::alloc_zeroed(block_layout(len)) };
    NonNull::new(ptr).ok_or_else(|| {
        log::warn!("block allocation of {} bytes failed", len);
        PoolError { size: len }
    })
}

#[cfg(unix)]
fn native_alloc(len: usize) -> Result<NonNull<u8>, PoolError> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        log::warn!(
            "mmap of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        );
        return Err(PoolError { size: len });
    }
    // mmap never hands back null on success
    Ok(NonNull::new(ptr as *mut u8).expect("mmap returned null"))
}

#[cfg(unix)]
fn native_free(base: NonNull<u8>, len: usize) {
    let rc = unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, len) };
    if rc != 0 {
        log::warn!(
            "munmap of {} bytes failed: {}",
            len,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn native_alloc(len: usize) -> Result<NonNull<u8>, PoolError> {
    managed_alloc(len)
}

#[cfg(not(unix))]
fn native_free(base: NonNull<u8>, len: usize) {
    unsafe { alloc::dealloc(base.as_ptr(), block_layout(len)) };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_run_search_finds_lowest_start() {
        assert_eq!(find_zero_run(0, 1), Some(0));
        assert_eq!(find_zero_run(0, 64), Some(0));
        assert_eq!(find_zero_run(u64::MAX, 1), None);
        assert_eq!(find_zero_run(0b0001, 1), Some(1));
        assert_eq!(find_zero_run(0b0101, 2), Some(3));
        // 4 free bits split 2+2 around rented ones must not match k=4
        let word = (!0u64 << 6) | 0b100100;
        assert_eq!(find_zero_run(word, 2), Some(0));
        assert_eq!(find_zero_run(word, 3), None);
        assert_eq!(find_zero_run(word, 4), None);
        // run straddling the top
        assert_eq!(find_zero_run(!(0b11u64 << 62), 2), Some(62));
        assert_eq!(find_zero_run(!(0b11u64 << 62), 3), None);
    }

    #[test]
    fn run_masks_cover_the_requested_bits() {
        assert_eq!(run_mask(0, 1), 1);
        assert_eq!(run_mask(0, 64), u64::MAX);
        assert_eq!(run_mask(62, 2), 0b11 << 62);
        assert_eq!(run_mask(4, 4), 0b1111 << 4);
    }

    #[test]
    fn rent_takes_the_lowest_run_and_return_frees_it() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let a = block.try_rent_run(4, false).unwrap();
        let b = block.try_rent_run(2, false).unwrap();
        assert_eq!(a.segmented_parts().unwrap().1, 0);
        assert_eq!(b.segmented_parts().unwrap().1, 4);
        assert_eq!(block.rented_segments(), 6);
        a.release(false);
        assert_eq!(block.rented_segments(), 2);
        // the freed low run is reused first
        let c = block.try_rent_run(3, false).unwrap();
        assert_eq!(c.segmented_parts().unwrap().1, 0);
        c.release(false);
        b.release(false);
        assert_eq!(block.rented_segments(), 0);
    }

    #[test]
    fn rent_at_requires_the_exact_run_free() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let a = block.try_rent_run(2, false).unwrap();
        assert!(block.try_rent_run_at(1, 2, false).is_none());
        let b = block.try_rent_run_at(2, 3, false).unwrap();
        assert_eq!(b.segmented_parts().unwrap().1, 2);
        assert!(block.try_rent_run_at(62, 3, false).is_none());
        a.release(false);
        b.release(false);
    }

    #[test]
    fn block_cannot_oversubscribe() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let all = block.try_rent_run(64, false).unwrap();
        assert!(block.try_rent_run(1, false).is_none());
        all.release(false);
        assert!(block.try_rent_run(1, false).is_some());
    }

    #[test]
    fn dirty_segments_are_zeroed_on_demand() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let mut a = block.try_rent_run(1, false).unwrap();
        a.write_at(0, &[0xAB; 32]);
        let start = a.segmented_parts().unwrap().1;
        a.release(false); // dirty return
        // same run, zero required on rent
        let b = block.try_rent_run_at(start, 1, true).unwrap();
        let mut read = [0xFFu8; 32];
        b.read_at(0, &mut read);
        assert_eq!(read, [0u8; 32]);
        b.release(false);
    }

    #[test]
    fn zero_on_release_marks_the_run_clean() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let mut a = block.try_rent_run(2, false).unwrap();
        a.write_at(SEGMENT_SIZE - 1, &[0x7E, 0x7F]);
        a.release(true);
        assert_eq!(block.zeroed.load(Ordering::Acquire) & 0b11, 0b11);
        let b = block.try_rent_run(2, true).unwrap();
        let mut read = [0xFFu8; 2];
        b.read_at(SEGMENT_SIZE - 1, &mut read);
        assert_eq!(read, [0, 0]);
        b.release(false);
    }

    #[test]
    fn reduce_releases_only_the_tail() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let mut a = block.try_rent_run(6, false).unwrap();
        assert_eq!(block.rented_segments(), 6);
        a.reduce(2, false);
        assert_eq!(block.rented_segments(), 2);
        assert_eq!(a.segment_count(), 2);
        // the tail is rentable again
        let b = block.try_rent_run_at(2, 4, false).unwrap();
        a.release(false);
        b.release(false);
        assert_eq!(block.rented_segments(), 0);
    }

    #[test]
    fn native_blocks_rent_and_return_like_managed() {
        let block = Arc::new(BufferBlock::new(true, 0).unwrap());
        assert!(block.is_native());
        let mut a = block.try_rent_run(3, false).unwrap();
        a.write_at(2 * SEGMENT_SIZE, &[9, 8, 7]);
        let mut read = [0u8; 3];
        a.read_at(2 * SEGMENT_SIZE, &mut read);
        assert_eq!(read, [9, 8, 7]);
        a.release(false);
        assert_eq!(block.rented_segments(), 0);
    }

    #[test]
    fn generation_advances_on_every_claim() {
        let block = Arc::new(BufferBlock::new(false, 0).unwrap());
        let g0 = block.generation();
        let a = block.try_rent_run(1, false).unwrap();
        let b = block.try_rent_run(1, false).unwrap();
        assert_eq!(block.generation(), g0 + 2);
        a.release(false);
        b.release(false);
    }
}
