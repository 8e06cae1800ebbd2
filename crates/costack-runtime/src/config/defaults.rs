//! Compile-time defaults for `LoopConfig`

/// Poll timeout while the loop is busy (ms)
pub const BUSY_TIMEOUT_MS: i32 = 20;

/// Poll timeout once the loop has backed off (ms)
pub const IDLE_TIMEOUT_MS: i32 = 100;

/// Consecutive empty polls before backing off
pub const IDLE_THRESHOLD: u64 = 100;

/// Shared coroutine stack per loop
pub const SHARED_STACK_SIZE: usize = costack_core::constants::DEFAULT_STACK_SIZE;

/// Initial epoll event buffer; doubles whenever a poll fills it
pub const POLL_EVENTS: usize = 16;
