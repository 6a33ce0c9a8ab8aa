//! Stream semantics over a caller-supplied contiguous buffer.
//!
//! The wrapped buffer is the storage: capacity is fixed at its length, and
//! anything that would grow past it fails with an unsupported-operation
//! error instead of allocating.

use std::io;

use crate::error::{Result, StreamError};

pub struct FixedBufferStream<'a> {
    buffer: &'a mut [u8],
    length: usize,
    position: usize,
    closed: bool,
}

impl<'a> FixedBufferStream<'a> {
    /// Wraps `buffer` with the full contents considered valid.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let length = buffer.len();
        Self {
            buffer,
            length,
            position: 0,
            closed: false,
        }
    }

    /// Wraps `buffer` as empty writable storage.
    pub fn empty(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            length: 0,
            position: 0,
            closed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.ensure_open()?;
        if position > self.capacity() {
            return Err(StreamError::range("position", position, self.capacity()));
        }
        self.position = position;
        Ok(())
    }

    /// The valid contents.
    pub fn get_ref(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn get_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.length]
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        Ok(self.buffer[..self.length].to_vec())
    }

    /// Sets the logical length within the fixed capacity, zero-filling any
    /// newly included range. Lengths past the capacity are a growth request
    /// and unsupported.
    pub fn set_len(&mut self, new_length: usize) -> Result<()> {
        self.ensure_open()?;
        if new_length > self.capacity() {
            return Err(StreamError::Unsupported(
                "fixed-buffer stream cannot grow past its buffer",
            ));
        }
        if new_length > self.length {
            self.buffer[self.length..new_length].fill(0);
        }
        self.length = new_length;
        Ok(())
    }

    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let available = self.length.saturating_sub(self.position);
        let n = dst.len().min(available);
        if n > 0 {
            dst[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
            self.position += n;
        }
        Ok(n)
    }

    pub fn write(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if src.is_empty() {
            return Ok(());
        }
        let end = match self.position.checked_add(src.len()) {
            Some(end) if end <= self.capacity() => end,
            _ => {
                return Err(StreamError::Unsupported(
                    "fixed-buffer stream cannot grow past its buffer",
                ))
            }
        };
        if self.position > self.length {
            self.buffer[self.length..self.position].fill(0);
        }
        self.buffer[self.position..end].copy_from_slice(src);
        self.position = end;
        if end > self.length {
            self.length = end;
        }
        Ok(())
    }

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

    pub fn write_to<W: io::Write>(&self, sink: &mut W) -> Result<u64> {
        self.ensure_open()?;
        sink.write_all(&self.buffer[..self.length])?;
        Ok(self.length as u64)
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }
}

impl io::Read for FixedBufferStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        FixedBufferStream::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for FixedBufferStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        FixedBufferStream::write(self, buf).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for FixedBufferStream<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.ensure_open().map_err(io::Error::from)?;
        let target = match pos {
            io::SeekFrom::Start(p) => p as i64,
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
        if target > self.capacity() {
            return Err(StreamError::range("position", target, self.capacity()).into());
        }
        self.position = target;
        Ok(target as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wraps_existing_contents() {
        let mut storage = [1u8, 2, 3, 4];
        let mut stream = FixedBufferStream::new(&mut storage);
        assert_eq!(stream.len(), 4);
        assert_eq!(stream.capacity(), 4);
        let mut out = [0u8; 8];
        assert_eq!(stream.read(&mut out).unwrap(), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
        assert_eq!(stream.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn empty_wrapper_writes_and_reads_back() {
        let mut storage = [0u8; 16];
        let mut stream = FixedBufferStream::empty(&mut storage);
        assert_eq!(stream.len(), 0);
        stream.write(&[9, 8, 7]).unwrap();
        assert_eq!(stream.len(), 3);
        stream.set_position(0).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn growth_attempts_are_unsupported() {
        let mut storage = [0u8; 8];
        let mut stream = FixedBufferStream::empty(&mut storage);
        assert!(matches!(
            stream.write(&[0u8; 9]),
            Err(StreamError::Unsupported(_))
        ));
        assert!(matches!(
            stream.set_len(9),
            Err(StreamError::Unsupported(_))
        ));
        stream.write(&[0u8; 8]).unwrap();
        assert!(matches!(
            stream.write_byte(1),
            Err(StreamError::Unsupported(_))
        ));
    }

    #[test]
    fn gap_writes_zero_fill_like_the_dynamic_stream() {
        let mut storage = [0xFFu8; 10];
        let mut stream = FixedBufferStream::empty(&mut storage);
        stream.set_position(4).unwrap();
        stream.write(&[0xAA]).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![0, 0, 0, 0, 0xAA]);
    }

    #[test]
    fn set_len_zero_fills_growth_within_capacity() {
        let mut storage = [0xEEu8; 6];
        let mut stream = FixedBufferStream::empty(&mut storage);
        stream.write(&[5, 5]).unwrap();
        stream.set_len(5).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![5, 5, 0, 0, 0]);
        stream.set_len(1).unwrap();
        assert_eq!(stream.to_vec().unwrap(), vec![5]);
    }

    #[test]
    fn seek_validates_the_range() {
        use std::io::{Seek, SeekFrom};
        let mut storage = [0u8; 4];
        let mut stream = FixedBufferStream::new(&mut storage);
        assert_eq!(stream.seek(SeekFrom::End(-1)).unwrap(), 3);
        assert!(stream.seek(SeekFrom::Current(-10)).is_err());
        assert!(stream.seek(SeekFrom::Start(5)).is_err());
    }

    #[test]
    fn closed_wrapper_rejects_operations() {
        let mut storage = [0u8; 4];
        let mut stream = FixedBufferStream::new(&mut storage);
        stream.close();
        assert!(matches!(stream.write(&[1]), Err(StreamError::Closed)));
        let mut out = [0u8; 1];
        assert!(matches!(stream.read(&mut out), Err(StreamError::Closed)));
    }
}
