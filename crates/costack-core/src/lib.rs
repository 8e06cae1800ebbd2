//! # costack-core
//!
//! Core types shared by the costack reactor and its coroutine runtime.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Context switching, epoll and sockets live in `costack-runtime` and
//! `costack-net`.
//!
//! ## Modules
//!
//! - `id` - Coroutine, timer and connection identifiers
//! - `state` - Coroutine state and loop status enums
//! - `error` - Error types
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CoroutineId, TimerId, ConnectionId};
pub use state::{CoroutineState, LoopStatus};
pub use error::{RuntimeError, RuntimeResult, MemoryError};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants for memory layout
pub mod constants {
    /// Guard page size (4 KB)
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest shared stack the runtime accepts
    pub const MIN_STACK_SIZE: usize = 64 * 1024;

    /// Default shared stack size per reactor thread (1 MB)
    pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

    /// Stack pointer alignment required by both supported ABIs
    pub const STACK_ALIGN: usize = 16;
}
