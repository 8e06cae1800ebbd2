//! Transport and client configuration
//!
//! ```rust,ignore
//! let transport = TcpTransport::new(&ev, TransportConfig::from_env().read_chunk(4096))?;
//! let client = AsyncClient::new(&ev, transport, ClientConfig::from_env());
//! ```

use costack_core::env::env_get;
use costack_core::error::{RuntimeError, RuntimeResult};
use costack_core::kprintln;

pub mod defaults {
    /// Write buffer limit per connection (64 KB)
    pub const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;

    /// Bytes read from a socket per readiness event (16 KB)
    pub const READ_CHUNK: usize = 16 * 1024;

    /// Default facade timeout in ms; 0 means none
    pub const OP_TIMEOUT_MS: u64 = 0;
}

/// `TcpTransport` buffer sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub write_buffer_capacity: usize,
    pub read_chunk: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TransportConfig {
    /// Defaults overridden by `CST_WRITE_BUFFER_CAPACITY` and `CST_READ_CHUNK`
    pub fn from_env() -> Self {
        Self {
            write_buffer_capacity: env_get(
                "CST_WRITE_BUFFER_CAPACITY",
                defaults::WRITE_BUFFER_CAPACITY,
            ),
            read_chunk: env_get("CST_READ_CHUNK", defaults::READ_CHUNK),
        }
    }

    pub fn new() -> Self {
        Self {
            write_buffer_capacity: defaults::WRITE_BUFFER_CAPACITY,
            read_chunk: defaults::READ_CHUNK,
        }
    }

    pub fn write_buffer_capacity(mut self, n: usize) -> Self {
        self.write_buffer_capacity = n;
        self
    }

    pub fn read_chunk(mut self, n: usize) -> Self {
        self.read_chunk = n;
        self
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if self.write_buffer_capacity == 0 {
            return Err(RuntimeError::InvalidConfig("write_buffer_capacity must be > 0"));
        }
        if self.read_chunk == 0 {
            return Err(RuntimeError::InvalidConfig("read_chunk must be > 0"));
        }
        Ok(())
    }

    pub fn print(&self) {
        kprintln!("TransportConfig:");
        kprintln!("  write_buffer_capacity: {}", self.write_buffer_capacity);
        kprintln!("  read_chunk: {}", self.read_chunk);
    }
}

/// `AsyncClient` settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Timeout given to every new `AsyncConnection`
    pub op_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ClientConfig {
    /// Defaults overridden by `CST_OP_TIMEOUT_MS` (0 disables the timeout)
    pub fn from_env() -> Self {
        Self::new().op_timeout_ms(env_get("CST_OP_TIMEOUT_MS", defaults::OP_TIMEOUT_MS))
    }

    pub fn new() -> Self {
        Self { op_timeout_ms: None }
    }

    pub fn op_timeout_ms(mut self, ms: u64) -> Self {
        self.op_timeout_ms = if ms == 0 { None } else { Some(ms) };
        self
    }
}
