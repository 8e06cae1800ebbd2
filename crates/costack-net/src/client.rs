//! Coroutine-blocking client over a `Transport`
//!
//! The client owns the coroutines it starts and two registries keyed by
//! `ConnectionId`:
//!
//! ```text
//!   connect_to()          on_connected            on_closed
//!   ------------> connecting ----------> connected ---------> (gone)
//!                     |
//!                     | on_connect_error
//!                     v
//!                  (gone, coroutine resumed with None)
//! ```
//!
//! Transport notifications resume the coroutine waiting on the matching
//! connection. No registry borrow is held across a resume, since the
//! resumed coroutine usually calls straight back into the client.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};

use costack_core::error::RuntimeResult;
use costack_core::{kdebug, ktrace, kwarn, ConnectionId, CoroutineId};
use costack_runtime::EventLoop;

use crate::config::{ClientConfig, TransportConfig};
use crate::connection::{AsyncConnection, ConnectionShared, ConnectionStatus};
use crate::coroutine::AsyncCoroutine;
use crate::tcp::TcpTransport;
use crate::transport::{Transport, TransportHandler};

/// Outcome slot filled by the handler before the connecting coroutine resumes
type ConnectSlot = Rc<RefCell<Option<Rc<ConnectionShared>>>>;

struct PendingConnect {
    co: AsyncCoroutine,
    outcome: ConnectSlot,
}

pub(crate) struct ClientInner {
    ev: Rc<EventLoop>,
    transport: Rc<dyn Transport>,
    config: ClientConfig,
    coroutines: RefCell<HashMap<CoroutineId, AsyncCoroutine>>,
    connecting: RefCell<HashMap<ConnectionId, PendingConnect>>,
    connected: RefCell<HashMap<ConnectionId, Rc<ConnectionShared>>>,
}

impl ClientInner {
    fn remove_coroutine(&self, id: CoroutineId) {
        assert!(
            !self.connecting.borrow().values().any(|p| p.co.id() == id),
            "removing {} while it is still connecting",
            id
        );
        assert!(
            !self.connected.borrow().values().any(|c| c.co.id() == id),
            "removing {} while it still owns a connection",
            id
        );
        let removed = self.coroutines.borrow_mut().remove(&id);
        assert!(removed.is_some(), "{} removed twice", id);
        ktrace!("client: {} finished", id);
    }

    /// Drop the connected entry for `id`, if any
    pub(crate) fn forget_connection(&self, id: ConnectionId) {
        self.connected.borrow_mut().remove(&id);
    }

    fn connection(&self, id: ConnectionId) -> Option<Rc<ConnectionShared>> {
        self.connected.borrow().get(&id).cloned()
    }
}

impl TransportHandler for ClientInner {
    fn on_connected(&self, id: ConnectionId) {
        let pending = self.connecting.borrow_mut().remove(&id);
        let Some(pending) = pending else {
            ktrace!("client: {} connected with nobody waiting, releasing", id);
            self.transport.release(id);
            return;
        };
        kdebug!("client: {} connected to {:?}", id, self.transport.peer_addr(id));

        let shared = ConnectionShared::new(id, pending.co.clone());
        self.connected.borrow_mut().insert(id, Rc::clone(&shared));
        *pending.outcome.borrow_mut() = Some(shared);
        if pending.co.is_suspended() {
            pending.co.resume();
        }
    }

    fn on_connect_error(&self, id: ConnectionId, addr: SocketAddr) {
        let pending = self.connecting.borrow_mut().remove(&id);
        kdebug!("client: {} to {} failed", id, addr);
        if let Some(pending) = pending {
            if pending.co.is_suspended() {
                pending.co.resume();
            }
        }
    }

    fn on_closed(&self, id: ConnectionId) {
        let shared = self.connected.borrow_mut().remove(&id);
        let Some(shared) = shared else {
            ktrace!("client: {} closed after release", id);
            return;
        };
        kdebug!("client: {} closed", id);
        let prev = shared.status.replace(ConnectionStatus::Closed);
        if prev != ConnectionStatus::Idle && shared.co.is_suspended() {
            shared.co.resume();
        }
    }

    fn on_message(&self, id: ConnectionId) {
        if let Some(shared) = self.connection(id) {
            shared.wake_if(ConnectionStatus::WaitingMessage);
        }
    }

    fn on_write_done(&self, id: ConnectionId) {
        if let Some(shared) = self.connection(id) {
            shared.wake_if(ConnectionStatus::WaitingWriteDone);
        }
    }
}

/// Runs functions in coroutines and lets them connect, read and write as
/// if the calls blocked
///
/// ```rust,ignore
/// let ev = EventLoop::new()?;
/// let client = AsyncClient::tcp(&ev)?;
/// client.run_in_coroutine(|client, co| {
///     if let Some(conn) = client.connect_to("127.0.0.1:80".parse().unwrap(), co) {
///         conn.write(b"GET / HTTP/1.0\r\n\r\n")?;
///         let reply = conn.read(0)?;
///     }
/// });
/// ev.run();
/// ```
#[derive(Clone)]
pub struct AsyncClient {
    inner: Rc<ClientInner>,
}

impl AsyncClient {
    /// Client over an arbitrary transport; installs itself as its handler
    pub fn new(ev: &Rc<EventLoop>, transport: Rc<dyn Transport>, config: ClientConfig) -> Self {
        let inner = Rc::new(ClientInner {
            ev: Rc::clone(ev),
            transport,
            config,
            coroutines: RefCell::new(HashMap::new()),
            connecting: RefCell::new(HashMap::new()),
            connected: RefCell::new(HashMap::new()),
        });
        let weak = Rc::downgrade(&inner);
        let handler: Weak<dyn TransportHandler> = weak;
        inner.transport.set_handler(handler);
        AsyncClient { inner }
    }

    /// Client over a `TcpTransport`, both configured from the environment
    pub fn tcp(ev: &Rc<EventLoop>) -> RuntimeResult<Self> {
        let transport = TcpTransport::new(ev, TransportConfig::from_env())?;
        Ok(Self::new(ev, transport, ClientConfig::from_env()))
    }

    /// Start `f` in a new coroutine owned by this client
    ///
    /// The coroutine runs until its first suspension before this returns.
    /// Once `f` returns, the coroutine is dropped from the client on the
    /// next loop iteration.
    pub fn run_in_coroutine<F>(&self, f: F) -> CoroutineId
    where
        F: FnOnce(&AsyncClient, &AsyncCoroutine) + 'static,
    {
        let client = Rc::downgrade(&self.inner);
        let co = AsyncCoroutine::new(&self.inner.ev, move |co| {
            let Some(inner) = client.upgrade() else {
                return;
            };
            let id = co.id();
            let client = AsyncClient { inner };
            f(&client, co);

            let weak = Rc::downgrade(&client.inner);
            client.inner.ev.queue_in_loop(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.remove_coroutine(id);
                }
            });
        });

        let id = co.id();
        self.inner.coroutines.borrow_mut().insert(id, co.clone());
        co.resume();
        id
    }

    /// Connect to `addr`, suspending `co` until the attempt resolves
    ///
    /// Must be called from `co` itself. Returns `None` if the connection
    /// could not be established.
    pub fn connect_to(&self, addr: SocketAddr, co: &AsyncCoroutine) -> Option<AsyncConnection> {
        let id = self.inner.transport.connect(addr);
        let outcome: ConnectSlot = Rc::new(RefCell::new(None));
        self.inner.connecting.borrow_mut().insert(
            id,
            PendingConnect {
                co: co.clone(),
                outcome: Rc::clone(&outcome),
            },
        );

        co.yield_now();

        let shared = outcome.borrow_mut().take();
        match shared {
            Some(shared) => Some(AsyncConnection::new(
                shared,
                Rc::clone(&self.inner.transport),
                Rc::downgrade(&self.inner),
                self.inner.config.op_timeout_ms,
            )),
            None => {
                // Woken by something other than the transport
                if self.inner.connecting.borrow_mut().remove(&id).is_some() {
                    kwarn!("client: {} to {} abandoned", id, addr);
                    self.inner.transport.release(id);
                }
                None
            }
        }
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.inner.ev
    }

    pub fn transport(&self) -> &Rc<dyn Transport> {
        &self.inner.transport
    }

    /// Coroutines started by `run_in_coroutine` and not yet removed
    pub fn coroutine_count(&self) -> usize {
        self.inner.coroutines.borrow().len()
    }

    /// Connect attempts still waiting for an outcome
    pub fn connecting_count(&self) -> usize {
        self.inner.connecting.borrow().len()
    }

    /// Established connections not yet closed or released
    pub fn connected_count(&self) -> usize {
        self.inner.connected.borrow().len()
    }
}

impl fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncClient")
            .field("coroutines", &self.coroutine_count())
            .field("connecting", &self.connecting_count())
            .field("connected", &self.connected_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AsyncConnectionError;
    use crate::test_util::{closed_port, quit_after, test_loop, MockTransport};
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn mock_client() -> (Rc<EventLoop>, Rc<MockTransport>, AsyncClient) {
        let ev = test_loop();
        let mock = MockTransport::new(&ev);
        let client = AsyncClient::new(&ev, mock.clone(), ClientConfig::new());
        quit_after(&ev, 5000);
        (ev, mock, client)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_connect_success_moves_entry() {
        let (ev, mock, client) = mock_client();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(80), co);
            s.borrow_mut().push((
                conn.is_some(),
                client.connecting_count(),
                client.connected_count(),
            ));
            let conn = conn.unwrap();
            assert_eq!(conn.peer_addr(), Some(addr(80)));
            assert_eq!(conn.status(), ConnectionStatus::Idle);
            drop(conn);
            assert_eq!(client.connected_count(), 0);
            client.event_loop().quit();
        });

        // Suspended in connect_to
        assert_eq!(client.connecting_count(), 1);
        assert_eq!(client.connected_count(), 0);
        assert_eq!(client.coroutine_count(), 1);

        ev.run();
        assert_eq!(*seen.borrow(), vec![(true, 0, 1)]);
        assert_eq!(mock.connect_calls(), 1);

        // Removal is deferred to the next iteration
        assert_eq!(client.coroutine_count(), 1);
        ev.run_once();
        assert_eq!(client.coroutine_count(), 0);
    }

    #[test]
    fn test_connect_failure_returns_none() {
        let (ev, mock, client) = mock_client();
        mock.refuse(addr(81));
        let resumed = Rc::new(Cell::new(0));

        let r = resumed.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(81), co);
            r.set(r.get() + 1);
            assert!(conn.is_none());
            assert_eq!(client.connected_count(), 0);
            assert_eq!(client.connecting_count(), 0);
            client.event_loop().quit();
        });
        ev.run();
        ev.run_once();

        assert_eq!(resumed.get(), 1);
        assert_eq!(client.connected_count(), 0);
        assert_eq!(client.coroutine_count(), 0);
    }

    #[test]
    fn test_concurrent_connects_resume_once_each() {
        let (ev, mock, client) = mock_client();
        // The first attempt completes last
        mock.delay(addr(1), 40);
        mock.delay(addr(2), 5);
        let order = Rc::new(RefCell::new(Vec::new()));
        let done = Rc::new(Cell::new(0));

        for port in [1u16, 2] {
            let order = order.clone();
            let done = done.clone();
            client.run_in_coroutine(move |client, co| {
                let conn = client.connect_to(addr(port), co);
                order.borrow_mut().push((port, conn.is_some()));
                done.set(done.get() + 1);
                if done.get() == 2 {
                    client.event_loop().quit();
                }
            });
        }
        assert_eq!(client.connecting_count(), 2);

        ev.run();
        assert_eq!(*order.borrow(), vec![(2, true), (1, true)]);
        assert_eq!(client.connecting_count(), 0);
        ev.run_once();
        assert_eq!(client.coroutine_count(), 0);
    }

    #[test]
    fn test_read_waits_for_enough_data() {
        let (ev, mock, client) = mock_client();
        let got = Rc::new(RefCell::new(Vec::new()));
        let conn_id = Rc::new(Cell::new(ConnectionId::NONE));

        let g = got.clone();
        let cid = conn_id.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(90), co).unwrap();
            cid.set(conn.id());
            // No borrow of `got` may span a suspension
            let first = conn.read(5).unwrap();
            g.borrow_mut().push(first);
            assert_eq!(conn.cached_data_size(), 6);
            let rest = conn.read(0).unwrap();
            g.borrow_mut().push(rest);
            assert!(!conn.has_cached_data());
            client.event_loop().quit();
        });

        // Connect, then feed the reply in two pieces
        while conn_id.get().is_none() {
            ev.run_once();
        }
        let id = conn_id.get();
        assert!(!id.is_none());
        mock.deliver(id, b"hel");
        ev.run_once();
        assert!(got.borrow().is_empty());
        mock.deliver(id, b"lo world");
        ev.run();

        assert_eq!(*got.borrow(), vec![b"hello".to_vec(), b" world".to_vec()]);
    }

    #[test]
    fn test_read_timeout_consumes_nothing() {
        let (ev, mock, client) = mock_client();
        let outcome = Rc::new(RefCell::new(None));

        let o = outcome.clone();
        let m = mock.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(91), co).unwrap();
            m.deliver(conn.id(), b"abcd");
            let start = costack_runtime::now();
            let r = conn.read_with_timeout(10, 30);
            assert!(costack_runtime::now() - start >= 30);
            *o.borrow_mut() = Some((r, conn.cached_data_size(), conn.status()));
            client.event_loop().quit();
        });
        ev.run();

        let (r, cached, status) = outcome.borrow_mut().take().unwrap();
        assert_eq!(r, Err(AsyncConnectionError::OperationTimeout));
        assert_eq!(cached, 4);
        assert_eq!(status, ConnectionStatus::Idle);
    }

    #[test]
    fn test_buffered_data_outlives_peer_close() {
        let (ev, mock, client) = mock_client();
        let outcome = Rc::new(RefCell::new(Vec::new()));

        let o = outcome.clone();
        let m = mock.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(92), co).unwrap();
            m.deliver(conn.id(), b"abc");
            m.hang_up(conn.id());
            o.borrow_mut().push(conn.read(0));
            // Parked until the hang-up arrives
            o.borrow_mut().push(conn.read(1));
            assert!(conn.closed());
            assert_eq!(client.connected_count(), 0);
            o.borrow_mut().push(conn.write(b"x").map(|_| Vec::new()));
            client.event_loop().quit();
        });
        ev.run();

        assert_eq!(
            *outcome.borrow(),
            vec![
                Ok(b"abc".to_vec()),
                Err(AsyncConnectionError::ConnectionClosed("read")),
                Err(AsyncConnectionError::ConnectionClosed("write")),
            ]
        );
    }

    #[test]
    fn test_write_waits_for_write_done() {
        let (ev, mock, client) = mock_client();
        mock.set_write_capacity(4);
        let conn_id = Rc::new(Cell::new(ConnectionId::NONE));
        let finished = Rc::new(Cell::new(false));

        let cid = conn_id.clone();
        let f = finished.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(93), co).unwrap();
            cid.set(conn.id());
            conn.write(b"0123456789").unwrap();
            conn.wait_write_done().unwrap();
            f.set(true);
            client.event_loop().quit();
        });
        ev.run();

        assert!(finished.get());
        assert_eq!(mock.sent(conn_id.get()), b"0123456789");
    }

    #[test]
    fn test_close_waits_for_notification() {
        let (ev, mock, client) = mock_client();
        let conn_id = Rc::new(Cell::new(ConnectionId::NONE));
        let statuses = Rc::new(RefCell::new(Vec::new()));

        let cid = conn_id.clone();
        let st = statuses.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(94), co).unwrap();
            cid.set(conn.id());
            conn.close().unwrap();
            st.borrow_mut().push(conn.status());
            conn.close().unwrap();
            st.borrow_mut().push(conn.status());
            client.event_loop().quit();
        });
        ev.run();

        assert_eq!(
            *statuses.borrow(),
            vec![ConnectionStatus::Closed, ConnectionStatus::Closed]
        );
        // The facade's drop released the transport side
        assert!(!mock.is_open(conn_id.get()));
        assert_eq!(mock.peer_addr(conn_id.get()), None);
    }

    #[test]
    fn test_dropped_facade_closes_connection() {
        let (ev, mock, client) = mock_client();
        let conn_id = Rc::new(Cell::new(ConnectionId::NONE));

        let cid = conn_id.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(95), co).unwrap();
            cid.set(conn.id());
            client.event_loop().quit();
        });
        ev.run();
        // The late close notification finds nothing to resume
        ev.run_once();

        assert!(!mock.is_open(conn_id.get()));
        assert_eq!(mock.peer_addr(conn_id.get()), None);
        assert_eq!(client.connected_count(), 0);
        assert_eq!(client.coroutine_count(), 0);
    }

    #[test]
    fn test_default_timeout_from_config() {
        let ev = test_loop();
        let mock = MockTransport::new(&ev);
        let client = AsyncClient::new(&ev, mock, ClientConfig::new().op_timeout_ms(20));
        quit_after(&ev, 5000);
        let outcome = Rc::new(RefCell::new(None));

        let o = outcome.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(addr(96), co).unwrap();
            assert_eq!(conn.timeout(), Some(20));
            *o.borrow_mut() = Some(conn.read(1));
            client.event_loop().quit();
        });
        ev.run();

        assert_eq!(
            outcome.borrow_mut().take(),
            Some(Err(AsyncConnectionError::OperationTimeout))
        );
    }

    #[test]
    fn test_tcp_echo_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server_addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            sock.write_all(&buf).unwrap();
            let mut rest = Vec::new();
            sock.read_to_end(&mut rest).unwrap();
        });

        let ev = test_loop();
        let transport = TcpTransport::new(&ev, TransportConfig::new()).unwrap();
        let client = AsyncClient::new(&ev, transport.clone(), ClientConfig::new());
        quit_after(&ev, 5000);
        let echoed = Rc::new(RefCell::new(None));

        let e = echoed.clone();
        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(server_addr, co).unwrap();
            conn.write(b"hello").unwrap();
            *e.borrow_mut() = Some(conn.read_with_timeout(5, 2000));
            conn.close().unwrap();
            client.event_loop().quit();
        });
        ev.run();
        server.join().unwrap();

        assert_eq!(echoed.borrow_mut().take(), Some(Ok(b"hello".to_vec())));
        ev.run_once();
        assert_eq!(client.coroutine_count(), 0);
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_tcp_dropped_facade_frees_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server_addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut all = Vec::new();
            sock.read_to_end(&mut all).unwrap();
            all
        });

        let ev = test_loop();
        let transport = TcpTransport::new(&ev, TransportConfig::new()).unwrap();
        let client = AsyncClient::new(&ev, transport.clone(), ClientConfig::new());
        quit_after(&ev, 5000);

        client.run_in_coroutine(move |client, co| {
            let conn = client.connect_to(server_addr, co).unwrap();
            conn.write(b"hi").unwrap();
            drop(conn);
            client.event_loop().quit();
        });
        ev.run();
        for _ in 0..5 {
            ev.run_once();
        }

        assert_eq!(server.join().unwrap(), b"hi");
        assert_eq!(client.coroutine_count(), 0);
        assert_eq!(client.connected_count(), 0);
        assert_eq!(transport.connection_count(), 0);
    }

    #[test]
    fn test_tcp_refused_returns_none() {
        let target = closed_port();
        let ev = test_loop();
        let client = AsyncClient::tcp(&ev).unwrap();
        quit_after(&ev, 5000);
        let result = Rc::new(Cell::new(None));

        let r = result.clone();
        client.run_in_coroutine(move |client, co| {
            r.set(Some(client.connect_to(target, co).is_none()));
            client.event_loop().quit();
        });
        ev.run();

        assert_eq!(result.get(), Some(true));
        assert_eq!(client.connected_count(), 0);
    }
}
