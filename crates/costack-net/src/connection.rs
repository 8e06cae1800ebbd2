//! Blocking-style view of one established connection
//!
//! Every blocking call records what the coroutine waits for in the
//! connection's status, suspends, and is resumed by the client when the
//! matching transport notification arrives (or by its timeout).

use std::cell::Cell;
use std::fmt;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use costack_core::ConnectionId;
use costack_runtime::{now, TimeStamp};

use crate::client::ClientInner;
use crate::coroutine::AsyncCoroutine;
use crate::error::{AsyncConnectionError, Result};
use crate::transport::Transport;

/// What the owning coroutine is blocked on, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Closed,
    WaitingMessage,
    WaitingWriteDone,
    WaitingClose,
}

/// State shared between the facade and the client's connected registry
pub(crate) struct ConnectionShared {
    pub(crate) id: ConnectionId,
    pub(crate) co: AsyncCoroutine,
    pub(crate) status: Cell<ConnectionStatus>,
}

impl ConnectionShared {
    pub(crate) fn new(id: ConnectionId, co: AsyncCoroutine) -> Rc<Self> {
        Rc::new(Self {
            id,
            co,
            status: Cell::new(ConnectionStatus::Idle),
        })
    }

    /// Resume the owner if it is suspended waiting for `status`
    pub(crate) fn wake_if(&self, status: ConnectionStatus) {
        if self.status.get() == status && self.co.is_suspended() {
            self.co.resume();
        }
    }
}

/// An established connection, usable from the coroutine that opened it
///
/// Dropping the facade releases the connection: a live one is closed
/// without waiting and the client forgets it.
pub struct AsyncConnection {
    shared: Rc<ConnectionShared>,
    transport: Rc<dyn Transport>,
    client: Weak<ClientInner>,
    timeout: Cell<Option<u64>>,
}

impl AsyncConnection {
    pub(crate) fn new(
        shared: Rc<ConnectionShared>,
        transport: Rc<dyn Transport>,
        client: Weak<ClientInner>,
        timeout: Option<u64>,
    ) -> Self {
        Self {
            shared,
            transport,
            client,
            timeout: Cell::new(timeout),
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr(self.shared.id)
    }

    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.get()
    }

    #[inline]
    pub fn closed(&self) -> bool {
        self.status() == ConnectionStatus::Closed
    }

    /// Timeout in ms applied to blocking calls; `None` waits forever
    pub fn set_timeout(&self, ms: Option<u64>) {
        self.timeout.set(ms);
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout.get()
    }

    /// Hand all of `data` to the transport
    ///
    /// Suspends on write-done whenever the write buffer is full. On error
    /// a prefix of `data` may already have been accepted.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let deadline = self.deadline(self.timeout.get());
        let mut rest = data;
        loop {
            if self.closed() {
                return Err(AsyncConnectionError::ConnectionClosed("write"));
            }
            let accepted = self.transport.write(self.shared.id, rest);
            rest = &rest[accepted..];
            if rest.is_empty() {
                return Ok(());
            }
            self.suspend(ConnectionStatus::WaitingWriteDone, deadline)?;
        }
    }

    /// Wait until everything written so far has been sent
    pub fn wait_write_done(&self) -> Result<()> {
        let deadline = self.deadline(self.timeout.get());
        while self.transport.pending_write(self.shared.id) > 0 {
            if self.closed() {
                return Err(AsyncConnectionError::ConnectionClosed("wait_write_done"));
            }
            self.suspend(ConnectionStatus::WaitingWriteDone, deadline)?;
        }
        Ok(())
    }

    /// Read exactly `n` bytes, or whatever is available (at least one
    /// byte) when `n` is 0. Uses the connection timeout.
    pub fn read(&self, n: usize) -> Result<Vec<u8>> {
        self.read_until(n, self.timeout.get())
    }

    /// `read` with an explicit timeout in ms
    pub fn read_with_timeout(&self, n: usize, ms: u64) -> Result<Vec<u8>> {
        self.read_until(n, Some(ms))
    }

    fn read_until(&self, n: usize, timeout: Option<u64>) -> Result<Vec<u8>> {
        let deadline = self.deadline(timeout);
        loop {
            let available = self.cached_data_size();
            if (n == 0 && available > 0) || (n > 0 && available >= n) {
                return Ok(self.read_cached(n));
            }
            if self.closed() {
                return Err(AsyncConnectionError::ConnectionClosed("read"));
            }
            self.suspend(ConnectionStatus::WaitingMessage, deadline)?;
        }
    }

    /// Take up to `n` buffered bytes (all of them when `n` is 0) without
    /// blocking
    pub fn read_cached(&self, n: usize) -> Vec<u8> {
        let mut out = Vec::new();
        self.transport.with_read_buffer(self.shared.id, &mut |buf: &[u8]| {
            let take = if n == 0 { buf.len() } else { n.min(buf.len()) };
            out.extend_from_slice(&buf[..take]);
            take
        });
        out
    }

    pub fn cached_data_size(&self) -> usize {
        let mut size = 0;
        self.transport.with_read_buffer(self.shared.id, &mut |buf: &[u8]| {
            size = buf.len();
            0
        });
        size
    }

    #[inline]
    pub fn has_cached_data(&self) -> bool {
        self.cached_data_size() > 0
    }

    /// Close the connection and wait for the close to complete
    ///
    /// Pending writes are flushed first. Closing a closed connection is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed() {
            return Ok(());
        }
        let deadline = self.deadline(self.timeout.get());
        self.transport.close(self.shared.id);
        while !self.closed() {
            self.suspend(ConnectionStatus::WaitingClose, deadline)?;
        }
        Ok(())
    }

    fn deadline(&self, timeout: Option<u64>) -> Option<TimeStamp> {
        timeout.map(|ms| now() + ms)
    }

    /// Park the owning coroutine until woken for `status` or `deadline`
    fn suspend(&self, status: ConnectionStatus, deadline: Option<TimeStamp>) -> Result<()> {
        let co = &self.shared.co;
        match deadline {
            Some(deadline) => {
                let now = now();
                if now >= deadline {
                    return Err(AsyncConnectionError::OperationTimeout);
                }
                self.shared.status.set(status);
                co.yield_with_timeout(deadline - now);
            }
            None => {
                self.shared.status.set(status);
                co.yield_now();
            }
        }

        if self.shared.status.get() != ConnectionStatus::Closed {
            self.shared.status.set(ConnectionStatus::Idle);
        }
        if co.timed_out() {
            return Err(AsyncConnectionError::OperationTimeout);
        }
        Ok(())
    }
}

impl Drop for AsyncConnection {
    fn drop(&mut self) {
        if let Some(client) = self.client.upgrade() {
            client.forget_connection(self.shared.id);
        }
        self.transport.release(self.shared.id);
    }
}

impl fmt::Debug for AsyncConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncConnection")
            .field("id", &self.shared.id)
            .field("status", &self.status())
            .field("timeout", &self.timeout.get())
            .finish()
    }
}
