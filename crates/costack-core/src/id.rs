//! Identifier types
//!
//! All three ids are plain `u64` newtypes. Zero is reserved as the "none"
//! sentinel for each of them, so issued ids always start at 1.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a coroutine
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoroutineId(u64);

impl CoroutineId {
    pub const NONE: CoroutineId = CoroutineId(0);

    /// Issue the next id. Ids are unique across all threads.
    #[inline]
    pub fn next() -> Self {
        CoroutineId(NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "CoroutineId(NONE)")
        } else {
            write!(f, "CoroutineId({})", self.0)
        }
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co#{}", self.0)
    }
}

/// Handle for a timer registered with a reactor
///
/// Issued by the timer manager from a per-manager counter; never reused
/// within one manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TimerId(u64);

impl TimerId {
    pub const NONE: TimerId = TimerId(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        TimerId(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerId({})", self.0)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle for one connection attempt and, if it succeeds, the
/// established connection. Issued by the transport.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const NONE: ConnectionId = ConnectionId(0);

    #[inline]
    pub const fn new(id: u64) -> Self {
        ConnectionId(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for ConnectionId {
    #[inline]
    fn from(id: u64) -> Self {
        ConnectionId(id)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
