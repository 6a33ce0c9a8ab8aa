//! Pooled, segmented in-memory byte streams.
//!
//! A [`SegmentedStream`] behaves like a growable, seekable byte buffer, but
//! its storage comes from a process-wide pool of fixed-size segments rather
//! than one large allocation. Small streams borrow a single array from a
//! per-size-class cache; past the largest small class, storage is a spine of
//! contiguous segment runs rented from [`pool::SegmentPool`], recycled on
//! [`SegmentedStream::close`] or drop.
//!
//! # Overview
//! Create a stream with [`SegmentedStream::new`] (or configure one through
//! [`StreamOptions::builder`]), then use it like any other in-memory stream:
//! it implements `std::io::{Read, Write, Seek}` and `bytes::Buf`, and copies
//! into `futures::io::AsyncWrite` destinations via
//! [`SegmentedStream::copy_to_async`].
//!
//! Pool memory is recycled across streams indefinitely;
//! [`release_memory_pool`] swaps in a fresh pool and lets the old blocks
//! drain as their remaining streams close.

pub mod bits;
pub mod block;
pub mod error;
pub mod fixed;
pub mod options;
pub mod pool;
pub mod segment;
pub mod small;
pub mod spine;
pub mod stream;

pub use error::{PoolError, Result, StreamError};
pub use fixed::FixedBufferStream;
pub use options::{PoolOptions, StreamOptions, ZeroBufferBehavior, MAX_STREAM_CAPACITY};
pub use pool::{configure_pool, current_pool, release_memory_pool};
pub use segment::{MemorySegment, SegmentBuffer, SEGMENT_SIZE};
pub use stream::{CopyToAsync, SegmentedStream, StreamBytes, StreamReader};
