//! The dynamic segmented stream: seekable, growable byte-stream semantics
//! over pool-rented storage.
//!
//! A stream starts out backed by a single small buffer and migrates to a
//! spine of standard segment runs the first time it outgrows the largest
//! small size class; it never migrates back. Growth prefers extending the
//! last spine entry contiguously within its block, so long sequential
//! writes keep the spine short.

use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Buf;
use futures::io::AsyncWrite;
use futures::ready;
use pin_project::pin_project;

use crate::block::BLOCK_BYTES;
use crate::error::{Result, StreamError};
use crate::options::{StreamOptions, ZeroBufferBehavior, MAX_STREAM_CAPACITY};
use crate::pool;
use crate::segment::{SegmentBuffer, SEGMENT_SIZE};
use crate::small;
use crate::spine::{self, Spine, SpineEntry};

/// Where the next read or write lands: a spine entry index and an offset
/// within that entry. Lazily re-resolved after anything that can move the
/// entry covering the current position.
#[derive(Clone, Copy)]
struct Cursor {
    entry: usize,
    offset: usize,
    valid: bool,
}

/// The storage plan for a capacity request.
enum AllocationNeed {
    Small { class: usize, total: usize },
    Standard { segments: usize, total: usize },
}

pub struct SegmentedStream {
    spine: Spine,
    small: Option<SegmentBuffer>,
    /// Set once the stream first uses standard segments; never cleared.
    standard: bool,
    length: usize,
    position: usize,
    /// Reported capacity, at most `allocated`.
    capacity: usize,
    /// Sum of all buffer lengths.
    allocated: usize,
    max_capacity: usize,
    zero: ZeroBufferBehavior,
    cursor: Cursor,
    closed: bool,
    _c: countme::Count<Self>,
}

impl SegmentedStream {
    pub fn new() -> Self {
        Self::with_options(StreamOptions::default()).expect("default options are valid")
    }

    pub fn with_options(options: StreamOptions) -> Result<Self> {
        if options.maximum_capacity > MAX_STREAM_CAPACITY {
            return Err(StreamError::range(
                "maximum capacity",
                options.maximum_capacity,
                MAX_STREAM_CAPACITY,
            ));
        }
        if options.initial_capacity > options.maximum_capacity {
            return Err(StreamError::range(
                "initial capacity",
                options.initial_capacity,
                options.maximum_capacity,
            ));
        }
        let zero = options
            .zero_buffer_behavior
            .unwrap_or_else(|| pool::pool_options().zero_buffer_behavior);
        let mut stream = Self {
            spine: Spine::new(),
            small: None,
            standard: false,
            length: 0,
            position: 0,
            capacity: 0,
            allocated: 0,
            max_capacity: options.maximum_capacity,
            zero,
            cursor: Cursor {
                entry: 0,
                offset: 0,
                valid: false,
            },
            closed: false,
            _c: countme::Count::new(),
        };
        if options.initial_capacity > 0 {
            stream.ensure_capacity(options.initial_capacity, false)?;
        }
        Ok(stream)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Reported capacity; what the stream has promised, not what it holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes actually rented from the pools.
    pub fn allocated_capacity(&self) -> usize {
        self.allocated
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.ensure_open()?;
        if position > self.max_capacity {
            return Err(StreamError::range("position", position, self.max_capacity));
        }
        self.position = position;
        self.cursor.valid = false;
        Ok(())
    }

    /// Grows the reported capacity to at least `needed`.
    ///
    /// Storage beyond what is already allocated is rented small-first while
    /// the stream has never held standard segments, standard otherwise. On
    /// failure nothing is reported as grown.
    pub fn ensure_capacity(&mut self, needed: usize, force_zero: bool) -> Result<()> {
        self.ensure_open()?;
        if needed <= self.capacity {
            return Ok(());
        }
        if needed > self.max_capacity {
            return Err(StreamError::range("capacity", needed, self.max_capacity));
        }
        if needed <= self.allocated {
            self.capacity = needed;
            return Ok(());
        }
        let zero_rent = force_zero || self.zero.zero_on_rent();
        match self.allocation_need(needed) {
            AllocationNeed::Small { class, total } => {
                let small_pool = small::pool();
                let mut fresh = SegmentBuffer::raw(small_pool.rent(class, zero_rent), class);
                debug_assert_eq!(fresh.len(), total);
                if let Some(old) = self.small.take() {
                    if self.length > 0 {
                        copy_between(&old, &mut fresh, self.length.min(old.len()));
                    }
                    old.release(self.zero.zero_on_release());
                }
                self.allocated = fresh.len();
                self.small = Some(fresh);
                self.capacity = needed;
                self.cursor.valid = false;
            }
            AllocationNeed::Standard { segments, total } => {
                debug_assert!(segments >= 1 && total == segments * SEGMENT_SIZE);
                self.grow_standard(needed, zero_rent)?
            }
        }
        Ok(())
    }

    /// Shrinks the reported capacity to `needed`, releasing spine segments
    /// past the target. Bytes below the current length are untouched.
    pub fn reduce_capacity(&mut self, needed: usize) -> Result<()> {
        self.ensure_open()?;
        if needed < self.length {
            return Err(StreamError::range("capacity", needed, self.length));
        }
        if needed >= self.capacity {
            return Ok(());
        }
        if !self.standard {
            // the small buffer stays; only the report moves
            self.capacity = needed;
            return Ok(());
        }
        if needed == self.allocated {
            self.capacity = needed;
            return Ok(());
        }
        let target_segments = if needed == 0 {
            0
        } else {
            pool::segments_for(needed)
        };
        let release_zero = self.zero.zero_on_release();
        while let Some(last) = self.spine.last_mut() {
            let count = last.buffer.segment_count();
            let start_segments = last.end_segments - count;
            if start_segments >= target_segments {
                let entry = self.spine.pop().expect("spine has a last entry");
                entry.buffer.release(release_zero);
            } else if last.end_segments > target_segments {
                let keep = target_segments - start_segments;
                let dropped = count - keep;
                last.buffer.reduce(keep, release_zero);
                last.end_offset -= dropped * SEGMENT_SIZE;
                last.end_segments -= dropped;
                break;
            } else {
                break;
            }
        }
        self.allocated = self.spine.last().map(|e| e.end_offset).unwrap_or(0);
        self.capacity = needed;
        self.cursor.valid = false;
        Ok(())
    }

    /// Sets the logical length. Growth zero-fills the newly included range;
    /// shrinking releases nothing.
    pub fn set_len(&mut self, new_length: usize) -> Result<()> {
        self.ensure_open()?;
        if new_length > self.max_capacity {
            return Err(StreamError::range(
                "length",
                new_length,
                self.max_capacity,
            ));
        }
        if new_length > self.length {
            self.ensure_capacity(new_length, false)?;
            let start = self.length;
            self.zero_region(start, new_length - start);
        }
        self.length = new_length;
        self.cursor.valid = false;
        Ok(())
    }

    /// Reads up to `dst.len()` bytes at the current position, returning how
    /// many were available.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let available = self.length.saturating_sub(self.position);
        let n = dst.len().min(available);
        if n == 0 {
            return Ok(0);
        }
        if !self.standard {
            let small = self.small.as_ref().expect("small-mode stream holds a buffer");
            small.read_at(self.position, &mut dst[..n]);
            self.position += n;
            self.cursor.valid = false;
        } else {
            self.verify_current_buffer();
            let mut entry = self.cursor.entry;
            let mut offset = self.cursor.offset;
            let mut copied = 0;
            while copied < n {
                let len = self.spine[entry].buffer.len();
                if offset == len {
                    entry += 1;
                    offset = 0;
                    continue;
                }
                let take = (n - copied).min(len - offset);
                self.spine[entry]
                    .buffer
                    .read_at(offset, &mut dst[copied..copied + take]);
                copied += take;
                offset += take;
            }
            self.position += n;
            self.cursor = Cursor {
                entry,
                offset,
                valid: true,
            };
        }
        Ok(n)
    }

    /// Writes all of `src` at the current position, growing capacity and
    /// zero-filling any gap between the old length and the position.
    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if src.is_empty() {
            return Ok(());
        }
        let end = match self.position.checked_add(src.len()) {
            Some(end) if end <= self.max_capacity => end,
            _ => {
                return Err(StreamError::range(
                    "write end",
                    self.position.saturating_add(src.len()),
                    self.max_capacity,
                ))
            }
        };
        self.ensure_capacity(end, false)?;
        if self.position > self.length {
            let gap_start = self.length;
            self.zero_region(gap_start, self.position - gap_start);
        }
        if !self.standard {
            let position = self.position;
            self.small
                .as_mut()
                .expect("small-mode stream holds a buffer")
                .write_at(position, src);
            self.position = end;
            self.cursor.valid = false;
        } else {
            self.verify_current_buffer();
            let mut entry = self.cursor.entry;
            let mut offset = self.cursor.offset;
            let mut copied = 0;
            while copied < src.len() {
                let len = self.spine[entry].buffer.len();
                if offset == len {
                    entry += 1;
                    offset = 0;
                    continue;
                }
                let take = (src.len() - copied).min(len - offset);
                self.spine[entry]
                    .buffer
                    .write_at(offset, &src[copied..copied + take]);
                copied += take;
                offset += take;
            }
            self.position = end;
            self.cursor = Cursor {
                entry,
                offset,
                valid: true,
            };
        }
        if end > self.length {
            self.length = end;
        }
        Ok(())
    }

    /// Reads one byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok(if self.read(&mut byte)? == 1 {
            Some(byte[0])
        } else {
            None
        })
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])
    }

    /// The stream contents as a fresh vector, independent of the position.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut out = vec![0u8; self.length];
        self.copy_out(0, &mut out);
        Ok(out)
    }

    /// Writes the entire contents to `sink` without moving the position.
    pub fn write_to<W: io::Write>(&self, sink: &mut W) -> Result<u64> {
        self.ensure_open()?;
        let mut pos = 0;
        while pos < self.length {
            let chunk = self.contiguous_chunk(pos);
            sink.write_all(chunk)?;
            pos += chunk.len();
        }
        Ok(self.length as u64)
    }

    /// Copies from the current position to the end into `sink`, advancing
    /// the position as bytes are written.
    pub fn copy_to<W: io::Write>(&mut self, sink: &mut W) -> Result<u64> {
        self.ensure_open()?;
        let mut written = 0u64;
        while self.position < self.length {
            let n = {
                let chunk = self.contiguous_chunk(self.position);
                sink.write_all(chunk)?;
                chunk.len()
            };
            self.position += n;
            written += n as u64;
        }
        self.cursor.valid = false;
        Ok(written)
    }

    /// The cooperative async counterpart of [`copy_to`](Self::copy_to).
    ///
    /// The next chunk is staged before the pending write completes, so each
    /// wakeup resumes directly into a write. Progress is observable through
    /// the position; cancellation is dropping the future.
    pub fn copy_to_async<W: AsyncWrite>(&mut self, writer: W) -> CopyToAsync<'_, W> {
        CopyToAsync {
            stream: self,
            writer,
            staged: None,
            written: 0,
        }
    }

    /// Returns every rented buffer to its pool and closes the stream. Any
    /// further operation fails with a closed-stream error. Dropping the
    /// stream closes it.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let release_zero = self.zero.zero_on_release();
        if let Some(small) = self.small.take() {
            small.release(release_zero);
        }
        let mut spine = mem::take(&mut self.spine);
        for entry in spine.drain(..) {
            entry.buffer.release(release_zero);
        }
        spine::store(spine);
        self.length = 0;
        self.position = 0;
        self.capacity = 0;
        self.allocated = 0;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    fn allocation_need(&self, needed: usize) -> AllocationNeed {
        if !self.standard {
            if let Some(class) = small::pool().class_for(needed) {
                return AllocationNeed::Small {
                    class,
                    total: small::pool().classes()[class],
                };
            }
        }
        let segments = pool::segments_for(needed);
        AllocationNeed::Standard {
            segments,
            total: segments * SEGMENT_SIZE,
        }
    }

    fn grow_standard(&mut self, needed: usize, zero_rent: bool) -> Result<()> {
        let pool = pool::current_pool();
        if let Some(old) = self.small.take() {
            let release_zero = self.zero.zero_on_release();
            if self.length > 0 {
                // migrate: the first standard buffer covers the whole need,
                // then takes the small buffer's valid prefix
                let request = needed.min(BLOCK_BYTES);
                let mut first = match pool.rent(request, zero_rent) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        self.small = Some(old);
                        return Err(e.into());
                    }
                };
                copy_between(&old, &mut first, self.length.min(old.len()));
                old.release(release_zero);
                self.spine = spine::take(4);
                let len = first.len();
                let segments = first.segment_count();
                self.spine.push(SpineEntry {
                    buffer: first,
                    end_offset: len,
                    end_segments: segments,
                });
                self.allocated = len;
            } else {
                old.release(release_zero);
                self.spine = spine::take(4);
                self.allocated = 0;
            }
            log::trace!("stream migrated to standard segments");
            self.standard = true;
            self.cursor.valid = false;
        } else if !self.standard {
            self.spine = spine::take(4);
            self.standard = true;
        }
        while self.allocated < needed {
            let remaining = needed - self.allocated;
            let request = remaining.min(BLOCK_BYTES);
            let (buffer, extended) = match self.spine.last() {
                Some(last) => pool.rent_from_preferred(request, zero_rent, &last.buffer)?,
                None => (pool.rent(request, zero_rent)?, false),
            };
            let added_len = buffer.len();
            let added_segments = buffer.segment_count();
            if extended {
                let last = self
                    .spine
                    .last_mut()
                    .expect("an extension implies a spine entry");
                last.buffer.absorb(buffer);
                last.end_offset += added_len;
                last.end_segments += added_segments;
            } else {
                let (end_offset, end_segments) = self
                    .spine
                    .last()
                    .map(|e| (e.end_offset, e.end_segments))
                    .unwrap_or((0, 0));
                self.spine.push(SpineEntry {
                    buffer,
                    end_offset: end_offset + added_len,
                    end_segments: end_segments + added_segments,
                });
            }
            self.allocated += added_len;
            self.cursor.valid = false;
        }
        self.capacity = needed;
        Ok(())
    }

    /// Re-resolves the cursor by binary search over the spine's cumulative
    /// end offsets.
    fn verify_current_buffer(&mut self) {
        if self.cursor.valid {
            return;
        }
        if !self.standard {
            self.cursor = Cursor {
                entry: 0,
                offset: self.position,
                valid: true,
            };
            return;
        }
        let entry = self.spine.partition_point(|e| e.end_offset <= self.position);
        let offset = if entry == self.spine.len() {
            // parked at (or past) the end of allocation; reads see nothing
            // here and writes grow first
            0
        } else {
            let entry_start = if entry == 0 {
                0
            } else {
                self.spine[entry - 1].end_offset
            };
            self.position - entry_start
        };
        self.cursor = Cursor {
            entry,
            offset,
            valid: true,
        };
    }

    /// Zero-fills `[start, start + len)`, which must be allocated.
    fn zero_region(&mut self, start: usize, len: usize) {
        if len == 0 {
            return;
        }
        debug_assert!(start + len <= self.allocated);
        if !self.standard {
            self.small
                .as_mut()
                .expect("small-mode stream holds a buffer")
                .zero_range(start, len);
            return;
        }
        let mut entry = self.spine.partition_point(|e| e.end_offset <= start);
        let mut pos = start;
        let mut remaining = len;
        while remaining > 0 {
            let entry_start = if entry == 0 {
                0
            } else {
                self.spine[entry - 1].end_offset
            };
            let e = &mut self.spine[entry];
            let local = pos - entry_start;
            let take = remaining.min(e.buffer.len() - local);
            e.buffer.zero_range(local, take);
            pos += take;
            remaining -= take;
            entry += 1;
        }
    }

    /// The contiguous run of readable bytes at `pos`, bounded by the
    /// containing segment and the stream length. Empty at or past the end.
    fn contiguous_chunk(&self, pos: usize) -> &[u8] {
        if pos >= self.length {
            return &[];
        }
        let limit = self.length - pos;
        let chunk = if !self.standard {
            let small = self.small.as_ref().expect("small-mode stream holds a buffer");
            small.chunk_at(pos)
        } else {
            let entry = self.spine.partition_point(|e| e.end_offset <= pos);
            let entry_start = if entry == 0 {
                0
            } else {
                self.spine[entry - 1].end_offset
            };
            self.spine[entry].buffer.chunk_at(pos - entry_start)
        };
        &chunk[..chunk.len().min(limit)]
    }

    /// Position-independent copy of `[start, start + dst.len())` into `dst`.
    fn copy_out(&self, start: usize, dst: &mut [u8]) {
        debug_assert!(start + dst.len() <= self.length);
        let mut copied = 0;
        while copied < dst.len() {
            let chunk = self.contiguous_chunk(start + copied);
            let take = chunk.len().min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&chunk[..take]);
            copied += take;
        }
    }

    /// A borrowed read-only view of the contents with its own cursor,
    /// starting at offset zero. The stream's position is untouched.
    pub fn reader(&self) -> StreamReader<'_> {
        StreamReader {
            stream: self,
            position: 0,
        }
    }

    /// Iterates the contents byte by byte, independent of the position.
    pub fn iter(&self) -> StreamBytes<'_> {
        StreamBytes {
            stream: self,
            position: 0,
        }
    }

    #[cfg(test)]
    fn spine_entries(&self) -> &[SpineEntry] {
        &self.spine
    }
}

impl Default for SegmentedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SegmentedStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl Buf for SegmentedStream {
    fn remaining(&self) -> usize {
        self.length.saturating_sub(self.position)
    }

    fn chunk(&self) -> &[u8] {
        self.contiguous_chunk(self.position)
    }

    fn advance(&mut self, cnt: usize) {
        if cnt > Buf::remaining(self) {
            panic!("cnt is larger than the remaining bytes")
        }
        self.position += cnt;
        self.cursor.valid = false;
    }
}

impl io::Read for SegmentedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SegmentedStream::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for SegmentedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SegmentedStream::write(self, buf).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for SegmentedStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.ensure_open().map_err(io::Error::from)?;
        let target = match pos {
            io::SeekFrom::Start(p) => {
                if p > self.max_capacity as u64 {
                    return Err(StreamError::range(
                        "position",
                        p as usize,
                        self.max_capacity,
                    )
                    .into());
                }
                p as i64
            }
            io::SeekFrom::Current(d) => self.position as i64 + d,
            io::SeekFrom::End(d) => self.length as i64 + d,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = target as usize;
        if target > self.max_capacity {
            return Err(StreamError::range("position", target, self.max_capacity).into());
        }
        self.position = target;
        self.cursor.valid = false;
        Ok(target as u64)
    }
}

impl io::BufRead for SegmentedStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.ensure_open().map_err(io::Error::from)?;
        Ok(self.contiguous_chunk(self.position))
    }

    fn consume(&mut self, amt: usize) {
        Buf::advance(self, amt)
    }
}

impl futures::io::AsyncRead for SegmentedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<futures::io::Result<usize>> {
        Poll::Ready(SegmentedStream::read(self.get_mut(), buf).map_err(Into::into))
    }
}

impl futures::io::AsyncBufRead for SegmentedStream {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<&[u8], futures::io::Error>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(StreamError::Closed.into()));
        }
        Poll::Ready(Ok(this.contiguous_chunk(this.position)))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Buf::advance(self.get_mut(), amt)
    }
}

/// A cloneable read-only cursor over a stream's contents.
#[derive(Clone)]
pub struct StreamReader<'a> {
    stream: &'a SegmentedStream,
    position: usize,
}

impl StreamReader<'_> {
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Buf for StreamReader<'_> {
    fn remaining(&self) -> usize {
        self.stream.length.saturating_sub(self.position)
    }

    fn chunk(&self) -> &[u8] {
        self.stream.contiguous_chunk(self.position)
    }

    fn advance(&mut self, cnt: usize) {
        if cnt > Buf::remaining(self) {
            panic!("cnt is larger than the remaining bytes")
        }
        self.position += cnt;
    }
}

impl io::Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let chunk = Buf::chunk(self);
            let amt = chunk.len().min(buf.len() - total);
            if amt == 0 {
                break;
            }
            buf[total..total + amt].copy_from_slice(&chunk[..amt]);
            self.advance(amt);
            total += amt;
        }
        Ok(total)
    }
}

impl io::BufRead for StreamReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.stream.contiguous_chunk(self.position))
    }

    fn consume(&mut self, amt: usize) {
        self.advance(amt)
    }
}

impl futures::io::AsyncRead for StreamReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<futures::io::Result<usize>> {
        Poll::Ready(io::Read::read(self.get_mut(), buf))
    }
}

impl futures::io::AsyncBufRead for StreamReader<'_> {
    fn poll_fill_buf(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<std::result::Result<&[u8], futures::io::Error>> {
        let this = self.get_mut();
        Poll::Ready(Ok(this.stream.contiguous_chunk(this.position)))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        self.get_mut().advance(amt)
    }
}

/// Byte iterator returned by [`SegmentedStream::iter`].
pub struct StreamBytes<'a> {
    stream: &'a SegmentedStream,
    position: usize,
}

impl Iterator for StreamBytes<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.position >= self.stream.length {
            return None;
        }
        let byte = self.stream.contiguous_chunk(self.position)[0];
        self.position += 1;
        Some(byte)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.stream.length.saturating_sub(self.position);
        (rem, Some(rem))
    }
}

/// Future returned by [`SegmentedStream::copy_to_async`].
#[pin_project]
pub struct CopyToAsync<'a, W> {
    stream: &'a mut SegmentedStream,
    #[pin]
    writer: W,
    /// Absolute position and length of the chunk staged for writing.
    staged: Option<(usize, usize)>,
    written: u64,
}

impl<'a, W: AsyncWrite> Future for CopyToAsync<'a, W> {
    type Output = io::Result<u64>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        if this.stream.closed {
            return Poll::Ready(Err(StreamError::Closed.into()));
        }
        loop {
            let (pos, len) = match *this.staged {
                Some(staged) => staged,
                None => {
                    let chunk = this.stream.contiguous_chunk(this.stream.position);
                    if chunk.is_empty() {
                        ready!(this.writer.as_mut().poll_flush(cx))?;
                        return Poll::Ready(Ok(*this.written));
                    }
                    let staged = (this.stream.position, chunk.len());
                    *this.staged = Some(staged);
                    staged
                }
            };
            let chunk = &this.stream.contiguous_chunk(pos)[..len];
            let n = ready!(this.writer.as_mut().poll_write(cx, chunk))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "async copy destination refused bytes",
                )));
            }
            this.stream.position = pos + n;
            this.stream.cursor.valid = false;
            *this.written += n as u64;
            *this.staged = if n == len {
                None
            } else {
                Some((pos + n, len - n))
            };
        }
    }
}

fn copy_between(src: &SegmentBuffer, dst: &mut SegmentBuffer, len: usize) {
    let mut offset = 0;
    while offset < len {
        let chunk = src.chunk_at(offset);
        let take = chunk.len().min(len - offset);
        dst.write_at(offset, &chunk[..take]);
        offset += take;
    }
}
