//! The process-wide segmented buffer pool.
//!
//! A pool owns a growing set of buffer blocks and hands out contiguous
//! segment runs as [`SegmentBuffer`]s. Rent and return never block: the
//! bitmaps inside each block are driven by atomic bit operations, and the
//! block list lock is only written to append a freshly allocated block.
//!
//! One pool instance serves the whole process. It can be swapped for a
//! fresh one at any time; handles rented from the old instance keep their
//! block alive until returned, after which the block memory is freed.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::block::{BufferBlock, BLOCK_BYTES, BLOCK_SEGMENTS};
use crate::error::PoolError;
use crate::options::PoolOptions;
use crate::segment::{SegmentBuffer, SEGMENT_SIZE};

const POOL_LOCK: &str = "segment pool lock poisoned";

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn segments_for(bytes: usize) -> usize {
    debug_assert!(bytes > 0);
    (bytes + SEGMENT_SIZE - 1) / SEGMENT_SIZE
}

pub struct SegmentPool {
    id: u64,
    native: bool,
    blocks: RwLock<Vec<Arc<BufferBlock>>>,
}

impl SegmentPool {
    pub fn new(options: &PoolOptions) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            native: options.use_native_large_memory_buffers,
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_native(&self) -> bool {
        self.native
    }

    /// Rents a run of segments covering at least `bytes`.
    ///
    /// `bytes` must not exceed one block; larger needs take several rents.
    /// A new block is allocated when no existing block has a fitting run;
    /// failure of that allocation propagates and changes nothing.
    pub fn rent(&self, bytes: usize, zero_required: bool) -> Result<SegmentBuffer, PoolError> {
        debug_assert!(bytes > 0 && bytes <= BLOCK_BYTES);
        let segments = segments_for(bytes);
        {
            let blocks = self.blocks.read().expect(POOL_LOCK);
            for block in blocks.iter() {
                if let Some(buffer) = block.try_rent_run(segments, zero_required) {
                    return Ok(buffer);
                }
            }
        }
        let mut blocks = self.blocks.write().expect(POOL_LOCK);
        // a racing rent may have appended a block with room
        for block in blocks.iter() {
            if let Some(buffer) = block.try_rent_run(segments, zero_required) {
                return Ok(buffer);
            }
        }
        let block = Arc::new(BufferBlock::new(self.native, self.id)?);
        log::debug!(
            "pool {}: new {} block, {} blocks total",
            self.id,
            if self.native { "native" } else { "managed" },
            blocks.len() + 1
        );
        let buffer = block
            .try_rent_run(segments, zero_required)
            .expect("fresh block satisfies any single-block run");
        blocks.push(block);
        Ok(buffer)
    }

    /// Rents with affinity to the block backing `preferred`: when the
    /// segments immediately after that run are free, they are claimed so the
    /// caller can extend its buffer in place. The flag reports whether the
    /// returned handle is such an extension.
    pub fn rent_from_preferred(
        &self,
        bytes: usize,
        zero_required: bool,
        preferred: &SegmentBuffer,
    ) -> Result<(SegmentBuffer, bool), PoolError> {
        let segments = segments_for(bytes);
        if let Some((block, start, count)) = preferred.segmented_parts() {
            if block.pool_id() == self.id {
                let end = start + count;
                if end + segments <= BLOCK_SEGMENTS {
                    if let Some(buffer) = block.try_rent_run_at(end, segments, zero_required) {
                        return Ok((buffer, true));
                    }
                }
            }
        }
        Ok((self.rent(bytes, zero_required)?, false))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().expect(POOL_LOCK).len()
    }

    /// Total segments rented across all blocks.
    pub fn rented_segments(&self) -> usize {
        self.blocks
            .read()
            .expect(POOL_LOCK)
            .iter()
            .map(|b| b.rented_segments())
            .sum()
    }
}

static POOL_CONFIG: Lazy<RwLock<PoolOptions>> = Lazy::new(|| RwLock::new(PoolOptions::default()));

static GLOBAL_POOL: Lazy<RwLock<Arc<SegmentPool>>> =
    Lazy::new(|| RwLock::new(Arc::new(SegmentPool::new(&pool_options()))));

/// Configures the options used when the next process-wide pool instance is
/// built (at first use, or by [`release_memory_pool`]). A live pool keeps
/// the options it was built with.
pub fn configure_pool(options: PoolOptions) {
    *POOL_CONFIG.write().expect(POOL_LOCK) = options;
}

pub(crate) fn pool_options() -> PoolOptions {
    *POOL_CONFIG.read().expect(POOL_LOCK)
}

/// The current process-wide pool. Callers capture the handle once per
/// operation; a replacement swapped in mid-operation is picked up on the
/// next capture.
pub fn current_pool() -> Arc<SegmentPool> {
    GLOBAL_POOL.read().expect(POOL_LOCK).clone()
}

/// Replaces the process-wide pool with a freshly constructed empty one.
///
/// Outstanding buffers still reference their original block and return to
/// it; each old block is freed once its last buffer comes back.
pub fn release_memory_pool() {
    let fresh = Arc::new(SegmentPool::new(&pool_options()));
    let old = mem::replace(&mut *GLOBAL_POOL.write().expect(POOL_LOCK), fresh);
    log::debug!(
        "released pool {}, {} blocks outstanding",
        old.id(),
        old.block_count()
    );
}
