//! # costack-runtime
//!
//! Single-threaded reactor driving stackful coroutines.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - The shared coroutine stack and `Coroutine`
//! - Ordered one-shot and periodic timers
//! - `Channel` and the epoll `Poller`
//! - The `EventLoop` with idle backoff, deferred calls and signal trapping
//! - `LoopHandle` for feeding a loop from other threads
//!
//! ```rust,ignore
//! use costack_runtime::{Coroutine, EventLoop};
//!
//! let ev = EventLoop::new()?;
//! let co = Coroutine::new(ev.shared_stack(), |co| {
//!     println!("step 1");
//!     co.yield_now();
//!     println!("step 2");
//! });
//! co.resume();
//! let again = co.clone();
//! ev.run_after(10, move || again.resume());
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("costack-runtime requires Linux (epoll, eventfd)");

pub mod arch;
pub mod channel;
pub mod config;
pub mod coroutine;
pub mod event_loop;
pub mod memory;
pub mod poller;
pub mod remote;
pub mod signal;
pub mod time;
pub mod timer;

#[cfg(test)]
mod test_util;

// Re-exports
pub use channel::Channel;
pub use config::LoopConfig;
pub use coroutine::{Coroutine, SharedStack};
pub use event_loop::{EventLoop, Functor, StatusCallback};
pub use poller::Poller;
pub use remote::LoopHandle;
pub use signal::Signal;
pub use time::{now, TimeStamp};
pub use timer::{ExpiredTimer, TimerManager};
