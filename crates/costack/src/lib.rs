//! # costack - coroutines on a shared stack, driven by an epoll reactor
//!
//! One thread, one `EventLoop`, any number of stackful coroutines taking
//! turns on a single stack. Suspended coroutines keep only the live part of
//! their stack, copied aside.
//!
//! ## Features
//!
//! - **Shared stack**: memory per suspended coroutine proportional to its depth
//! - **Fast Context Switch**: hand-written assembly for x86_64 and aarch64
//! - **Reactor**: epoll channels, ordered timers, deferred calls, idle backoff
//! - **Blocking-style I/O**: `connect_to`, `read`, `write` and `close` that
//!   suspend the calling coroutine instead of the thread
//! - **Cross-thread wakeups**: `LoopHandle` queues closures from any thread
//!
//! ## Quick Start
//!
//! ```ignore
//! use costack::{run_client, kinfo};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     run_client(|client, co| {
//!         let addr = "127.0.0.1:8080".parse().unwrap();
//!         match client.connect_to(addr, co) {
//!             Some(conn) => kinfo!("connected to {:?}", conn.peer_addr()),
//!             None => kinfo!("connect failed"),
//!         }
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        run_in_coroutine(), connect_to(), read/write         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                AsyncClient / AsyncCoroutine                 │
//! │     connection registries, timeout-aware suspension         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Channel  │      │   Timer   │      │ Deferred  │
//!    │  + epoll  │      │  Manager  │      │  Functors │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                  Shared Stack                           │
//!    │   one mmap region, guard page, frames copied on yield   │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use costack_core::{
    ConnectionId,
    CoroutineId,
    CoroutineState,
    LoopStatus,
    MemoryError,
    RuntimeError,
    RuntimeResult,
    TimerId,
};

// Re-export kprint macros for debug logging
pub use costack_core::{kprint, kprintln, klog, kerror, kwarn, kinfo, kdebug, ktrace};
pub use costack_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use costack_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use costack_runtime::{
    now,
    Channel,
    Coroutine,
    EventLoop,
    LoopConfig,
    LoopHandle,
    SharedStack,
    Signal,
    TimeStamp,
};

// Re-export the coroutine bridge
pub use costack_net::{
    AsyncClient,
    AsyncConnection,
    AsyncConnectionError,
    AsyncCoroutine,
    ClientConfig,
    ConnectionStatus,
    TcpTransport,
    Transport,
    TransportConfig,
    TransportHandler,
};

/// Run `f` in a coroutine on a fresh loop with a TCP client, until `f`
/// returns
///
/// Loop and transport are configured from the environment.
pub fn run_client<F>(f: F) -> RuntimeResult<()>
where
    F: FnOnce(&AsyncClient, &AsyncCoroutine) + 'static,
{
    let ev = EventLoop::new()?;
    let client = AsyncClient::tcp(&ev)?;
    client.run_in_coroutine(move |client, co| {
        f(client, co);
        client.event_loop().quit();
    });
    ev.run();
    Ok(())
}
