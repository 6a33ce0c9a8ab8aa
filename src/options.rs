use crate::error::{Result, StreamError};

/// Hard ceiling on stream length, position and capacity.
pub const MAX_STREAM_CAPACITY: usize = i32::MAX as usize;

/// When buffer contents are overwritten with zeros during the pool
/// lifecycle.
///
/// The four values are distinct: release-time zeroing and rent-time zeroing
/// are independent transitions, consulted separately by the pool and the
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroBufferBehavior {
    /// Buffers are handed out and returned as-is.
    None,
    /// Buffers are zeroed when returned to the pool.
    OnRelease,
    /// Buffers are zeroed when rented, unless already known zeroed.
    OnRent,
    /// Both transitions zero.
    OnBoth,
}

impl ZeroBufferBehavior {
    pub fn zero_on_rent(self) -> bool {
        matches!(self, ZeroBufferBehavior::OnRent | ZeroBufferBehavior::OnBoth)
    }

    pub fn zero_on_release(self) -> bool {
        matches!(
            self,
            ZeroBufferBehavior::OnRelease | ZeroBufferBehavior::OnBoth
        )
    }
}

impl Default for ZeroBufferBehavior {
    fn default() -> Self {
        ZeroBufferBehavior::OnRelease
    }
}

/// Pool-scoped configuration, bound at pool construction.
///
/// Changes apply to the next pool instance (first use, or the instance
/// created by [`release_memory_pool`](crate::pool::release_memory_pool)),
/// never to a live one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolOptions {
    /// Back blocks with process-native allocations instead of the global
    /// allocator.
    pub use_native_large_memory_buffers: bool,
    /// Default zeroing behavior for streams that do not specify their own.
    pub zero_buffer_behavior: ZeroBufferBehavior,
}

/// Per-stream configuration.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub(crate) maximum_capacity: usize,
    pub(crate) initial_capacity: usize,
    pub(crate) zero_buffer_behavior: Option<ZeroBufferBehavior>,
}

impl StreamOptions {
    pub fn builder() -> StreamOptionsBuilder {
        StreamOptionsBuilder::new()
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            maximum_capacity: MAX_STREAM_CAPACITY,
            initial_capacity: 0,
            zero_buffer_behavior: None,
        }
    }
}

pub struct StreamOptionsBuilder {
    maximum_capacity: Option<usize>,
    initial_capacity: Option<usize>,
    zero_buffer_behavior: Option<ZeroBufferBehavior>,
}

impl StreamOptionsBuilder {
    pub fn new() -> Self {
        Self {
            maximum_capacity: None,
            initial_capacity: None,
            zero_buffer_behavior: None,
        }
    }

    pub fn maximum_capacity(mut self, maximum_capacity: usize) -> Self {
        self.maximum_capacity = Some(maximum_capacity);
        self
    }

    pub fn initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = Some(initial_capacity);
        self
    }

    pub fn zero_buffer_behavior(mut self, behavior: ZeroBufferBehavior) -> Self {
        self.zero_buffer_behavior = Some(behavior);
        self
    }

    pub fn build(self) -> Result<StreamOptions> {
        let maximum_capacity = self.maximum_capacity.unwrap_or(MAX_STREAM_CAPACITY);
        if maximum_capacity > MAX_STREAM_CAPACITY {
            return Err(StreamError::range(
                "maximum capacity",
                maximum_capacity,
                MAX_STREAM_CAPACITY,
            ));
        }
        let initial_capacity = self.initial_capacity.unwrap_or(0);
        if initial_capacity > maximum_capacity {
            return Err(StreamError::range(
                "initial capacity",
                initial_capacity,
                maximum_capacity,
            ));
        }
        Ok(StreamOptions {
            maximum_capacity,
            initial_capacity,
            zero_buffer_behavior: self.zero_buffer_behavior,
        })
    }
}

impl Default for StreamOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
