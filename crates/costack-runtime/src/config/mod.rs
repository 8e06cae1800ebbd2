//! Event loop configuration
//!
//! Compile-time defaults with environment overrides.
//!
//! ```rust,ignore
//! use costack_runtime::config::LoopConfig;
//!
//! let config = LoopConfig::from_env()
//!     .busy_timeout_ms(5)
//!     .idle_threshold(1000);
//! let ev = EventLoop::with_config(config)?;
//! ```

pub mod defaults;

use costack_core::constants::MIN_STACK_SIZE;
use costack_core::env::env_get;
use costack_core::error::{RuntimeError, RuntimeResult};
use costack_core::kprintln;

/// Reactor configuration with builder pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Poll timeout while busy, in ms
    pub busy_timeout_ms: i32,
    /// Poll timeout after backing off, in ms
    pub idle_timeout_ms: i32,
    /// Empty polls (with Idle status) before backing off
    pub idle_threshold: u64,
    /// Usable bytes of the loop's shared coroutine stack
    pub shared_stack_size: usize,
    /// Initial epoll event buffer length
    pub poll_events: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl LoopConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CST_BUSY_TIMEOUT_MS`
    /// - `CST_IDLE_TIMEOUT_MS`
    /// - `CST_IDLE_THRESHOLD`
    /// - `CST_SHARED_STACK_SIZE`
    /// - `CST_POLL_EVENTS`
    pub fn from_env() -> Self {
        Self {
            busy_timeout_ms: env_get("CST_BUSY_TIMEOUT_MS", defaults::BUSY_TIMEOUT_MS),
            idle_timeout_ms: env_get("CST_IDLE_TIMEOUT_MS", defaults::IDLE_TIMEOUT_MS),
            idle_threshold: env_get("CST_IDLE_THRESHOLD", defaults::IDLE_THRESHOLD),
            shared_stack_size: env_get("CST_SHARED_STACK_SIZE", defaults::SHARED_STACK_SIZE),
            poll_events: env_get("CST_POLL_EVENTS", defaults::POLL_EVENTS),
        }
    }

    /// Library defaults, ignoring the environment
    pub fn new() -> Self {
        Self {
            busy_timeout_ms: defaults::BUSY_TIMEOUT_MS,
            idle_timeout_ms: defaults::IDLE_TIMEOUT_MS,
            idle_threshold: defaults::IDLE_THRESHOLD,
            shared_stack_size: defaults::SHARED_STACK_SIZE,
            poll_events: defaults::POLL_EVENTS,
        }
    }

    // Builder methods

    pub fn busy_timeout_ms(mut self, ms: i32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn idle_timeout_ms(mut self, ms: i32) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn idle_threshold(mut self, n: u64) -> Self {
        self.idle_threshold = n;
        self
    }

    pub fn shared_stack_size(mut self, size: usize) -> Self {
        self.shared_stack_size = size;
        self
    }

    pub fn poll_events(mut self, n: usize) -> Self {
        self.poll_events = n;
        self
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.busy_timeout_ms < 0 {
            return Err(RuntimeError::InvalidConfig("busy_timeout_ms must be >= 0"));
        }
        if self.idle_timeout_ms < 0 {
            return Err(RuntimeError::InvalidConfig("idle_timeout_ms must be >= 0"));
        }
        if self.shared_stack_size < MIN_STACK_SIZE {
            return Err(RuntimeError::InvalidConfig("shared_stack_size must be >= 64KB"));
        }
        if self.poll_events == 0 {
            return Err(RuntimeError::InvalidConfig("poll_events must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        kprintln!("costack loop configuration:");
        kprintln!("  busy_timeout_ms:    {}", self.busy_timeout_ms);
        kprintln!("  idle_timeout_ms:    {}", self.idle_timeout_ms);
        kprintln!("  idle_threshold:     {}", self.idle_threshold);
        kprintln!("  shared_stack_size:  {}", self.shared_stack_size);
        kprintln!("  poll_events:        {}", self.poll_events);
    }
}
