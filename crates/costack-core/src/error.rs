//! Error types for the costack runtime

use core::fmt;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors surfaced by reactor and runtime set-up
///
/// Misuse of the coroutine protocol (resuming a dead coroutine, nested
/// resume) is not represented here; those are panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A system call failed with the given errno
    Os(i32),

    /// Shared stack mapping failed
    Memory(MemoryError),

    /// Configuration rejected by `validate()`
    InvalidConfig(&'static str),

    /// Operation only allowed before the loop's first iteration
    LoopStarted,
}

impl RuntimeError {
    /// Capture the calling thread's current errno
    pub fn last_os_error() -> Self {
        RuntimeError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Raw errno, if this is an OS error
    pub fn errno(&self) -> Option<i32> {
        match self {
            RuntimeError::Os(code) => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Os(code) => {
                write!(f, "os error {}: {}", code, std::io::Error::from_raw_os_error(*code))
            }
            RuntimeError::Memory(e) => write!(f, "memory error: {}", e),
            RuntimeError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            RuntimeError::LoopStarted => write!(f, "event loop already started"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Os(e.raw_os_error().unwrap_or(0))
    }
}

impl From<RuntimeError> for std::io::Error {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Os(code) => std::io::Error::from_raw_os_error(code),
            other => std::io::Error::other(other),
        }
    }
}

/// Memory-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap failed
    AllocationFailed,

    /// mprotect on the guard page failed
    ProtectionFailed,

    /// Requested stack size is too small or overflows
    InvalidSize(usize),
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "memory allocation failed"),
            MemoryError::ProtectionFailed => write!(f, "memory protection change failed"),
            MemoryError::InvalidSize(size) => write!(f, "invalid stack size {}", size),
        }
    }
}

impl std::error::Error for MemoryError {}

impl From<MemoryError> for RuntimeError {
    fn from(e: MemoryError) -> Self {
        RuntimeError::Memory(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = RuntimeError::Memory(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: memory allocation failed");

        let e = RuntimeError::InvalidConfig("idle threshold must be > 0");
        assert_eq!(e.to_string(), "invalid config: idle threshold must be > 0");
    }

    #[test]
    fn test_error_conversion() {
        let err: RuntimeError = MemoryError::InvalidSize(12).into();
        assert!(matches!(err, RuntimeError::Memory(MemoryError::InvalidSize(12))));

        let io = std::io::Error::from_raw_os_error(libc_enoent());
        let err: RuntimeError = io.into();
        assert_eq!(err.errno(), Some(libc_enoent()));

        let back: std::io::Error = err.into();
        assert_eq!(back.raw_os_error(), Some(libc_enoent()));
    }

    // ENOENT is 2 on every Unix this crate targets.
    fn libc_enoent() -> i32 {
        2
    }
}
