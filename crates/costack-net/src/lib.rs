//! # costack-net — blocking-style connections on reactor coroutines
//!
//! This crate turns the callback-driven connection layer of a costack
//! event loop into calls that look blocking from inside a coroutine.
//! A coroutine that waits for a connect, a reply or a flush is suspended on
//! the loop's shared stack and resumed by the matching notification.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Coroutine User Code                             │
//! │   client.connect_to(addr, co)  ← looks like blocking I/O │
//! │   conn.read(n) / conn.write(b) ← but yields to the loop  │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ record status, yield (with timeout)
//!                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         AsyncClient                                      │
//! │   connecting / connected registries by ConnectionId      │
//! │   TransportHandler: resume whoever waits on the event    │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ Transport trait
//! ┌──────────────────▼──────────────────────────────────────┐
//! │         TcpTransport (on the EventLoop)                  │
//! │   non-blocking sockets → Channel → epoll Poller          │
//! │   read buffer, bounded write buffer, deferred callbacks  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use costack_net::AsyncClient;
//! use costack_runtime::EventLoop;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ev = EventLoop::new()?;
//!     let client = AsyncClient::tcp(&ev)?;
//!
//!     client.run_in_coroutine(|client, co| {
//!         let addr = "127.0.0.1:8080".parse().unwrap();
//!         let Some(conn) = client.connect_to(addr, co) else {
//!             return;
//!         };
//!         conn.set_timeout(Some(1000));
//!         if conn.write(b"ping\n").is_ok() {
//!             if let Ok(reply) = conn.read(0) {
//!                 println!("{}", String::from_utf8_lossy(&reply));
//!             }
//!         }
//!         let _ = conn.close();
//!         client.event_loop().quit();
//!     });
//!
//!     ev.run();
//!     Ok(())
//! }
//! ```
//!
//! ## Design Decisions
//!
//! - **Integer connection ids**: registries never hold transport objects,
//!   only `ConnectionId`s issued by the transport
//! - **Deferred notifications**: the transport never calls its handler from
//!   inside `connect`, `write` or `close`
//! - **One armed timer per suspension**: `AsyncCoroutine::resume` always
//!   disarms it, so a timeout can never wake a coroutine twice
//! - **Tagged errors**: timeouts and closes come back as
//!   `AsyncConnectionError`, never as panics

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod coroutine;
pub mod error;
pub mod tcp;
pub mod transport;

#[cfg(test)]
mod test_util;

// Re-export the main types
pub use buffer::ConnectionBuffer;
pub use client::AsyncClient;
pub use config::{ClientConfig, TransportConfig};
pub use connection::{AsyncConnection, ConnectionStatus};
pub use coroutine::AsyncCoroutine;
pub use error::{AsyncConnectionError, Result};
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportHandler};
