//! Coroutine state and reactor status types

use core::fmt;

/// State of a coroutine
///
/// Transitions are `Suspended -> Running -> {Suspended, Dead}`. A fresh
/// coroutine starts out `Suspended`; `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoroutineState {
    /// Not executing; may be resumed
    Suspended = 0,

    /// Currently executing on the shared stack
    Running = 1,

    /// Entry function returned (or panicked)
    Dead = 2,
}

impl CoroutineState {
    #[inline]
    pub const fn is_resumable(&self) -> bool {
        matches!(self, CoroutineState::Suspended)
    }

    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, CoroutineState::Dead)
    }
}

impl fmt::Display for CoroutineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoroutineState::Suspended => write!(f, "SUSPENDED"),
            CoroutineState::Running => write!(f, "RUNNING"),
            CoroutineState::Dead => write!(f, "DEAD"),
        }
    }
}

/// What the per-iteration status callback reports back to the reactor
///
/// `Idle` allows the loop to back off to its idle poll timeout once enough
/// empty polls have accumulated; `Busy` pins it to the busy timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopStatus {
    #[default]
    Idle,
    Busy,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopStatus::Idle => write!(f, "IDLE"),
            LoopStatus::Busy => write!(f, "BUSY"),
        }
    }
}
