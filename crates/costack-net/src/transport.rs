//! The raw connection layer the bridge is written against
//!
//! A `Transport` owns sockets and their buffers; it reports progress to a
//! single `TransportHandler`. Every handler call is made from the reactor
//! (channel dispatch or a deferred functor), never synchronously from
//! inside a `Transport` method, so a handler may freely call back into the
//! transport.

use std::net::SocketAddr;
use std::rc::Weak;

use costack_core::ConnectionId;

/// Connection-level notifications
pub trait TransportHandler {
    /// The attempt `id` returned by `Transport::connect` is established
    fn on_connected(&self, id: ConnectionId);

    /// The attempt `id` failed; the id is dead
    fn on_connect_error(&self, id: ConnectionId, addr: SocketAddr);

    /// The connection was closed, by the peer or by `Transport::close`.
    /// Data already read stays available until the id is released with a
    /// second `close` or with `release`.
    fn on_closed(&self, id: ConnectionId);

    /// New data was appended to the read buffer
    fn on_message(&self, id: ConnectionId);

    /// The write buffer drained after having been non-empty
    fn on_write_done(&self, id: ConnectionId);
}

/// Non-blocking client connection layer
pub trait Transport {
    /// Install the receiver of all notifications
    fn set_handler(&self, handler: Weak<dyn TransportHandler>);

    /// Start connecting to `addr`. Exactly one of `on_connected` or
    /// `on_connect_error` follows for the returned id.
    fn connect(&self, addr: SocketAddr) -> ConnectionId;

    /// Queue `data` for sending; returns how many bytes were accepted.
    /// Unknown or closed ids accept nothing.
    fn write(&self, id: ConnectionId, data: &[u8]) -> usize;

    /// Close a live connection (`on_closed` follows once pending writes are
    /// flushed), or release one that is already closed.
    fn close(&self, id: ConnectionId);

    /// Give up `id`: a live connection is closed as by `close`, and the
    /// transport forgets the id on its own once it is closed. Nothing is
    /// reported for a released id.
    fn release(&self, id: ConnectionId);

    /// Show the read buffer to `consume`; the bytes it reports are removed.
    /// Returns the number consumed.
    fn with_read_buffer(&self, id: ConnectionId, consume: &mut dyn FnMut(&[u8]) -> usize) -> usize;

    /// Bytes accepted by `write` but not yet sent
    fn pending_write(&self, id: ConnectionId) -> usize;

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr>;
}
