use thiserror::Error;

/// Failure to obtain block memory from the operating system.
#[derive(Debug, Error)]
#[error("allocation of a {size} byte buffer block failed")]
pub struct PoolError {
    pub(crate) size: usize,
}

impl PoolError {
    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{what} {value} out of range, limit is {limit}")]
    Range {
        what: &'static str,
        value: usize,
        limit: usize,
    },
    #[error("stream is closed")]
    Closed,
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Allocation(#[from] PoolError),
}

impl StreamError {
    pub(crate) fn range(what: &'static str, value: usize, limit: usize) -> Self {
        StreamError::Range { what, value, limit }
    }
}

impl From<StreamError> for std::io::Error {
    fn from(err: StreamError) -> std::io::Error {
        match err {
            StreamError::Io(e) => e,
            e => std::io::Error::new(std::io::ErrorKind::Other, Box::new(e)),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
