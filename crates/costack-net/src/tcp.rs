//! Non-blocking TCP client transport
//!
//! Sockets are raw non-blocking fds watched through a `Channel` on the
//! owning loop. A connection moves through:
//!
//! ```text
//!   Connecting --SO_ERROR == 0--> Connected --close()--> Closing --drained--> Closed
//!       |                             |                                          ^
//!       +--SO_ERROR != 0--> (dropped) +--EOF / reset-----------------------------+
//! ```
//!
//! A `Closed` connection keeps its read buffer until `close()` is called
//! on it again, which releases it. A connection handed to `release()` is
//! forgotten as soon as it reaches `Closed`, without a notification.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use costack_core::error::RuntimeResult;
use costack_core::{kdebug, kinfo, ktrace, kwarn, ConnectionId};
use costack_runtime::{Channel, EventLoop};

use crate::buffer::ConnectionBuffer;
use crate::config::TransportConfig;
use crate::transport::{Transport, TransportHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

struct TcpConn {
    id: ConnectionId,
    peer: SocketAddr,
    state: Cell<ConnState>,
    released: Cell<bool>,
    channel: Rc<Channel>,
    fd: RefCell<Option<OwnedFd>>,
    read_buf: RefCell<ConnectionBuffer>,
    write_buf: RefCell<ConnectionBuffer>,
}

impl TcpConn {
    fn raw_fd(&self) -> Option<RawFd> {
        self.fd.borrow().as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Stop watching and close the socket; buffered input stays
    fn shutdown(&self) {
        self.state.set(ConnState::Closed);
        if let Err(e) = self.channel.remove() {
            kwarn!("tcp: removing channel of {} failed: {}", self.id, e);
        }
        self.channel.clear_callbacks();
        self.fd.borrow_mut().take();
        self.write_buf.borrow_mut().clear();
    }
}

impl Drop for TcpConn {
    fn drop(&mut self) {
        if let Err(e) = self.channel.remove() {
            kwarn!("tcp: removing channel of {} failed: {}", self.id, e);
        }
        self.channel.clear_callbacks();
    }
}

/// `Transport` over non-blocking TCP sockets
pub struct TcpTransport {
    ev: Rc<EventLoop>,
    config: TransportConfig,
    me: Weak<TcpTransport>,
    handler: RefCell<Option<Weak<dyn TransportHandler>>>,
    conns: RefCell<HashMap<ConnectionId, Rc<TcpConn>>>,
    next_id: Cell<u64>,
    scratch: RefCell<Vec<u8>>,
}

impl TcpTransport {
    pub fn new(ev: &Rc<EventLoop>, config: TransportConfig) -> RuntimeResult<Rc<Self>> {
        config.validate()?;
        Ok(Rc::new_cyclic(|me| Self {
            ev: Rc::clone(ev),
            scratch: RefCell::new(vec![0; config.read_chunk]),
            config,
            me: me.clone(),
            handler: RefCell::new(None),
            conns: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        }))
    }

    /// Connections currently tracked, in any state
    pub fn connection_count(&self) -> usize {
        self.conns.borrow().len()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn conn(&self, id: ConnectionId) -> Option<Rc<TcpConn>> {
        self.conns.borrow().get(&id).cloned()
    }

    fn notify<F: FnOnce(&dyn TransportHandler)>(&self, f: F) {
        let handler = self.handler.borrow().as_ref().and_then(Weak::upgrade);
        match handler {
            Some(handler) => f(&*handler),
            None => ktrace!("tcp: no handler installed, dropping notification"),
        }
    }

    fn notify_later<F: FnOnce(&dyn TransportHandler) + 'static>(&self, f: F) {
        let me = self.me.clone();
        self.ev.queue_in_loop(move || {
            if let Some(me) = me.upgrade() {
                me.notify(f);
            }
        });
    }

    /// Shut `conn` down, then report it or forget it if it was released
    fn finish_close(&self, conn: &Rc<TcpConn>) {
        conn.shutdown();
        let id = conn.id;
        if conn.released.get() {
            ktrace!("tcp: {} released", id);
            self.conns.borrow_mut().remove(&id);
        } else {
            self.notify_later(move |h| h.on_closed(id));
        }
    }

    fn start_connect(&self, id: ConnectionId, addr: SocketAddr) {
        let (fd, established) = match open_socket(&addr) {
            Ok(r) => r,
            Err(errno) => {
                kdebug!("tcp: connect {} to {} failed: {}", id, addr, describe(errno));
                self.notify(|h| h.on_connect_error(id, addr));
                return;
            }
        };

        let channel = Channel::new(&self.ev, fd.as_raw_fd());
        let me = self.me.clone();
        channel.set_read_callback(move || {
            if let Some(me) = me.upgrade() {
                me.handle_read(id);
            }
        });
        let me = self.me.clone();
        channel.set_write_callback(move || {
            if let Some(me) = me.upgrade() {
                me.handle_write(id);
            }
        });
        let me = self.me.clone();
        channel.set_error_callback(move || {
            if let Some(me) = me.upgrade() {
                me.handle_error(id);
            }
        });

        let conn = Rc::new(TcpConn {
            id,
            peer: addr,
            state: Cell::new(ConnState::Connecting),
            released: Cell::new(false),
            channel,
            fd: RefCell::new(Some(fd)),
            read_buf: RefCell::new(ConnectionBuffer::unbounded()),
            write_buf: RefCell::new(ConnectionBuffer::bounded(self.config.write_buffer_capacity)),
        });

        let registered = if established {
            conn.state.set(ConnState::Connected);
            conn.channel.enable_reading()
        } else {
            conn.channel.enable_writing()
        };
        if let Err(e) = registered {
            kwarn!("tcp: watching {} failed: {}", id, e);
            self.notify(|h| h.on_connect_error(id, addr));
            return;
        }

        self.conns.borrow_mut().insert(id, conn);
        if established {
            kdebug!("tcp: {} connected to {}", id, addr);
            self.notify(|h| h.on_connected(id));
        } else {
            ktrace!("tcp: {} connecting to {}", id, addr);
        }
    }

    /// Resolve a pending connect from the socket's SO_ERROR
    fn finish_connect(&self, conn: &Rc<TcpConn>) {
        let err = conn.raw_fd().map(socket_error).unwrap_or(libc::EBADF);
        if err != 0 {
            kdebug!("tcp: connect {} to {} failed: {}", conn.id, conn.peer, describe(err));
            self.conns.borrow_mut().remove(&conn.id);
            conn.shutdown();
            let (id, peer) = (conn.id, conn.peer);
            self.notify(|h| h.on_connect_error(id, peer));
            return;
        }

        conn.state.set(ConnState::Connected);
        let watched = conn
            .channel
            .disable_writing()
            .and_then(|_| conn.channel.enable_reading());
        if let Err(e) = watched {
            kwarn!("tcp: watching {} failed: {}", conn.id, e);
        }
        kdebug!("tcp: {} connected to {}", conn.id, conn.peer);
        let id = conn.id;
        self.notify(|h| h.on_connected(id));
    }

    fn handle_read(&self, id: ConnectionId) {
        let Some(conn) = self.conn(id) else {
            return;
        };
        if conn.state.get() != ConnState::Connected {
            return;
        }
        let Some(fd) = conn.raw_fd() else {
            return;
        };

        let n = {
            let mut scratch = self.scratch.borrow_mut();
            let n = unsafe {
                libc::recv(fd, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len(), 0)
            };
            if n > 0 {
                conn.read_buf.borrow_mut().append(&scratch[..n as usize]);
            }
            n
        };

        if n > 0 {
            ktrace!("tcp: {} read {} bytes", id, n);
            self.notify(|h| h.on_message(id));
        } else if n == 0 {
            kdebug!("tcp: {} closed by {}", id, conn.peer);
            self.close_by_peer(&conn);
        } else {
            let err = errno();
            if err != libc::EAGAIN && err != libc::EWOULDBLOCK && err != libc::EINTR {
                kdebug!("tcp: {} read failed: {}", id, describe(err));
                self.close_by_peer(&conn);
            }
        }
    }

    fn handle_write(&self, id: ConnectionId) {
        let Some(conn) = self.conn(id) else {
            return;
        };
        match conn.state.get() {
            ConnState::Connecting => self.finish_connect(&conn),
            ConnState::Connected | ConnState::Closing => self.flush(&conn),
            ConnState::Closed => {}
        }
    }

    fn handle_error(&self, id: ConnectionId) {
        let Some(conn) = self.conn(id) else {
            return;
        };
        match conn.state.get() {
            ConnState::Connecting => self.finish_connect(&conn),
            ConnState::Connected | ConnState::Closing => {
                let err = conn.raw_fd().map(socket_error).unwrap_or(0);
                if err == libc::ECONNRESET || err == libc::ECONNREFUSED {
                    kinfo!("tcp: {} to {}: {}", id, conn.peer, describe(err));
                } else if err != 0 {
                    kwarn!("tcp: {} to {}: {}", id, conn.peer, describe(err));
                }
                // Without EPOLLIN the read path never sees the EOF
                if conn.channel.revents() & libc::EPOLLIN as u32 == 0 {
                    self.close_by_peer(&conn);
                }
            }
            ConnState::Closed => {}
        }
    }

    /// Send as much buffered output as the socket takes
    fn flush(&self, conn: &Rc<TcpConn>) {
        let Some(fd) = conn.raw_fd() else {
            return;
        };
        loop {
            let sent = {
                let buf = conn.write_buf.borrow();
                if buf.is_empty() {
                    break;
                }
                send(fd, buf.as_slice())
            };
            match sent {
                Ok(n) => conn.write_buf.borrow_mut().consume(n),
                Err(err) if err == libc::EAGAIN || err == libc::EWOULDBLOCK => return,
                Err(err) => {
                    kdebug!("tcp: {} write failed: {}", conn.id, describe(err));
                    self.close_by_peer(conn);
                    return;
                }
            }
        }

        if let Err(e) = conn.channel.disable_writing() {
            kwarn!("tcp: unwatching writes of {} failed: {}", conn.id, e);
        }
        if conn.state.get() == ConnState::Closing {
            self.finish_close(conn);
        } else {
            let id = conn.id;
            self.notify(|h| h.on_write_done(id));
        }
    }

    fn close_by_peer(&self, conn: &Rc<TcpConn>) {
        if conn.state.get() == ConnState::Closed {
            return;
        }
        self.finish_close(conn);
    }
}

impl Transport for TcpTransport {
    fn set_handler(&self, handler: Weak<dyn TransportHandler>) {
        *self.handler.borrow_mut() = Some(handler);
    }

    fn connect(&self, addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);

        let me = self.me.clone();
        self.ev.queue_in_loop(move || {
            if let Some(me) = me.upgrade() {
                me.start_connect(id, addr);
            }
        });
        id
    }

    fn write(&self, id: ConnectionId, data: &[u8]) -> usize {
        let Some(conn) = self.conn(id) else {
            return 0;
        };
        if conn.state.get() != ConnState::Connected || data.is_empty() {
            return 0;
        }
        let Some(fd) = conn.raw_fd() else {
            return 0;
        };

        let mut written = 0;
        if conn.write_buf.borrow().is_empty() {
            match send(fd, data) {
                Ok(n) => written = n,
                Err(err) if err == libc::EAGAIN || err == libc::EWOULDBLOCK => {}
                Err(err) => {
                    kdebug!("tcp: {} write failed: {}", id, describe(err));
                    self.close_by_peer(&conn);
                    return 0;
                }
            }
        }

        let buffered = conn.write_buf.borrow_mut().append(&data[written..]);
        if !conn.write_buf.borrow().is_empty() && !conn.channel.is_writing() {
            if let Err(e) = conn.channel.enable_writing() {
                kwarn!("tcp: watching writes of {} failed: {}", id, e);
            }
        }
        written + buffered
    }

    fn close(&self, id: ConnectionId) {
        let Some(conn) = self.conn(id) else {
            return;
        };
        match conn.state.get() {
            ConnState::Connecting | ConnState::Closed => {
                self.conns.borrow_mut().remove(&id);
            }
            ConnState::Connected => {
                conn.state.set(ConnState::Closing);
                if let Err(e) = conn.channel.disable_reading() {
                    kwarn!("tcp: unwatching reads of {} failed: {}", id, e);
                }
                if conn.write_buf.borrow().is_empty() {
                    self.finish_close(&conn);
                }
            }
            ConnState::Closing => {}
        }
    }

    fn release(&self, id: ConnectionId) {
        let Some(conn) = self.conn(id) else {
            return;
        };
        conn.released.set(true);
        match conn.state.get() {
            ConnState::Connected => self.close(id),
            ConnState::Closing => {}
            ConnState::Connecting | ConnState::Closed => {
                self.conns.borrow_mut().remove(&id);
            }
        }
    }

    fn with_read_buffer(&self, id: ConnectionId, consume: &mut dyn FnMut(&[u8]) -> usize) -> usize {
        let Some(conn) = self.conn(id) else {
            return 0;
        };
        let mut buf = conn.read_buf.borrow_mut();
        let n = consume(buf.as_slice()).min(buf.len());
        buf.consume(n);
        n
    }

    fn pending_write(&self, id: ConnectionId) -> usize {
        self.conn(id).map(|c| c.write_buf.borrow().len()).unwrap_or(0)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.conn(id).map(|c| c.peer)
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("connections", &self.conns.borrow().len())
            .field("config", &self.config)
            .finish()
    }
}

#[inline]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn describe(errno: i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno)
}

fn send(fd: RawFd, data: &[u8]) -> Result<usize, i32> {
    loop {
        let n = unsafe {
            libc::send(fd, data.as_ptr() as *const libc::c_void, data.len(), libc::MSG_NOSIGNAL)
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = errno();
        if err != libc::EINTR {
            return Err(err);
        }
    }
}

/// Pending error of a socket, or the getsockopt failure itself
fn socket_error(fd: RawFd) -> i32 {
    let mut err: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc < 0 {
        errno()
    } else {
        err
    }
}

/// Create a non-blocking socket and start connecting it to `addr`
///
/// Returns the socket and whether the connect already completed.
fn open_socket(addr: &SocketAddr) -> Result<(OwnedFd, bool), i32> {
    let domain = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let raw = unsafe {
        libc::socket(
            domain,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(errno());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let opt: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            raw,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &opt as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }

    let (storage, len) = sockaddr_from(addr);
    let rc = unsafe {
        libc::connect(
            raw,
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    };
    if rc == 0 {
        return Ok((fd, true));
    }
    match errno() {
        libc::EINPROGRESS => Ok((fd, false)),
        err => Err(err),
    }
}

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in;
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_port = v4.port().to_be();
                (*sin).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6;
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_port = v6.port().to_be();
                (*sin6).sin6_flowinfo = v6.flowinfo();
                (*sin6).sin6_addr.s6_addr = v6.ip().octets();
                (*sin6).sin6_scope_id = v6.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{closed_port, test_loop, Event, Recorder};
    use costack_runtime::now;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn transport(ev: &Rc<EventLoop>) -> (Rc<TcpTransport>, Rc<Recorder>) {
        let transport = TcpTransport::new(ev, TransportConfig::new()).unwrap();
        let recorder = Recorder::new(ev);
        let weak = Rc::downgrade(&recorder);
        let handler: Weak<dyn TransportHandler> = weak;
        transport.set_handler(handler);
        (transport, recorder)
    }

    #[test]
    fn test_connect_write_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
        });

        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);
        // Nothing happens until the loop runs
        assert_eq!(t.connection_count(), 0);
        assert!(rec.events().is_empty());

        rec.quit_on(|e| matches!(e, Event::Connected(_)));
        ev.run();
        assert_eq!(rec.events(), vec![Event::Connected(id)]);
        assert_eq!(t.peer_addr(id), Some(addr));

        assert_eq!(t.write(id, b"ping"), 4);
        rec.quit_on(|e| matches!(e, Event::Message(_)));
        ev.run();

        let mut got = Vec::new();
        let consumed = t.with_read_buffer(id, &mut |buf: &[u8]| {
            got.extend_from_slice(buf);
            buf.len()
        });
        assert_eq!(consumed, 4);
        assert_eq!(got, b"ping");
        assert_eq!(t.with_read_buffer(id, &mut |buf: &[u8]| buf.len()), 0);
        server.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let addr = closed_port();
        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);

        rec.quit_on(|e| matches!(e, Event::ConnectError(..)));
        ev.run();
        assert_eq!(rec.events(), vec![Event::ConnectError(id, addr)]);
        assert_eq!(t.connection_count(), 0);
        assert_eq!(t.write(id, b"x"), 0);
    }

    #[test]
    fn test_peer_close_keeps_buffered_input() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            sock.write_all(b"bye").unwrap();
        });

        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);
        rec.quit_on(|e| matches!(e, Event::Closed(_)));
        ev.run();
        server.join().unwrap();

        let events = rec.events();
        assert_eq!(events.first(), Some(&Event::Connected(id)));
        assert_eq!(events.last(), Some(&Event::Closed(id)));
        assert_eq!(t.write(id, b"late"), 0);

        let mut got = Vec::new();
        t.with_read_buffer(id, &mut |buf: &[u8]| {
            got.extend_from_slice(buf);
            buf.len()
        });
        assert_eq!(got, b"bye");

        // Second close releases the connection
        assert_eq!(t.connection_count(), 1);
        t.close(id);
        assert_eq!(t.connection_count(), 0);
    }

    #[test]
    fn test_local_close_flushes_then_notifies() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut all = Vec::new();
            sock.read_to_end(&mut all).unwrap();
            all
        });

        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);
        rec.quit_on(|e| matches!(e, Event::Connected(_)));
        ev.run();

        let payload = vec![7u8; 256 * 1024];
        let mut accepted = t.write(id, &payload);
        assert!(accepted > 0);
        // Keep feeding whatever the bounded buffer takes
        while accepted < payload.len() {
            rec.quit_on(|e| matches!(e, Event::WriteDone(_)));
            ev.run();
            accepted += t.write(id, &payload[accepted..]);
        }
        t.close(id);
        assert!(!rec.events().contains(&Event::Closed(id)));

        rec.quit_on(|e| matches!(e, Event::Closed(_)));
        ev.run();
        assert_eq!(server.join().unwrap().len(), payload.len());
        assert_eq!(t.pending_write(id), 0);
    }

    #[test]
    fn test_release_forgets_connection_once_drained() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            // Let the client's socket buffers fill up first
            thread::sleep(Duration::from_millis(200));
            let mut all = Vec::new();
            sock.read_to_end(&mut all).unwrap();
            all.len()
        });

        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);
        rec.quit_on(|e| matches!(e, Event::Connected(_)));
        ev.run();

        // Fill past what the socket takes so the release waits on a flush
        let payload = vec![3u8; 16 * 1024 * 1024];
        let accepted = t.write(id, &payload);
        assert!(accepted < payload.len());
        assert!(t.pending_write(id) > 0);
        t.release(id);
        assert_eq!(t.connection_count(), 1);

        let guard = now() + 5000;
        while t.connection_count() > 0 && now() < guard {
            ev.run_once();
        }
        assert_eq!(t.connection_count(), 0);
        assert_eq!(server.join().unwrap(), accepted);
        assert!(!rec.events().contains(&Event::Closed(id)));
        assert_eq!(t.peer_addr(id), None);
    }

    #[test]
    fn test_release_of_idle_connection_is_immediate() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut all = Vec::new();
            sock.read_to_end(&mut all).unwrap();
        });

        let ev = test_loop();
        let (t, rec) = transport(&ev);
        let id = t.connect(addr);
        rec.quit_on(|e| matches!(e, Event::Connected(_)));
        ev.run();

        t.release(id);
        assert_eq!(t.connection_count(), 0);
        // A second release of a forgotten id is a no-op
        t.release(id);
        server.join().unwrap();
    }

    #[test]
    fn test_sockaddr_v6_layout() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        let (storage, len) = sockaddr_from(&addr);
        assert_eq!(len as usize, std::mem::size_of::<libc::sockaddr_in6>());
        assert_eq!(storage.ss_family, libc::AF_INET6 as libc::sa_family_t);
    }
}
