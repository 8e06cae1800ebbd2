//! Errors returned by blocking calls on an `AsyncConnection`

use std::fmt;

/// Result type for connection facade operations
pub type Result<T> = std::result::Result<T, AsyncConnectionError>;

/// Why a blocking connection call gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncConnectionError {
    /// The operation's timeout fired first
    OperationTimeout,

    /// The connection closed before the operation completed
    ConnectionClosed(&'static str),
}

impl AsyncConnectionError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, AsyncConnectionError::OperationTimeout)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, AsyncConnectionError::ConnectionClosed(_))
    }
}

impl fmt::Display for AsyncConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncConnectionError::OperationTimeout => write!(f, "operation timed out"),
            AsyncConnectionError::ConnectionClosed(op) => {
                write!(f, "connection closed during {}", op)
            }
        }
    }
}

impl std::error::Error for AsyncConnectionError {}

impl From<AsyncConnectionError> for std::io::Error {
    fn from(e: AsyncConnectionError) -> Self {
        let kind = match e {
            AsyncConnectionError::OperationTimeout => std::io::ErrorKind::TimedOut,
            AsyncConnectionError::ConnectionClosed(_) => std::io::ErrorKind::ConnectionAborted,
        };
        std::io::Error::new(kind, e)
    }
}
