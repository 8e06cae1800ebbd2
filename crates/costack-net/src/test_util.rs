//! Helpers shared by unit tests

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::rc::{Rc, Weak};

use costack_core::constants::MIN_STACK_SIZE;
use costack_core::{ConnectionId, TimerId};
use costack_runtime::{EventLoop, LoopConfig};

use crate::transport::{Transport, TransportHandler};

/// Loop with library defaults and a small shared stack
pub(crate) fn test_loop() -> Rc<EventLoop> {
    EventLoop::with_config(LoopConfig::new().shared_stack_size(MIN_STACK_SIZE * 4)).unwrap()
}

/// A loopback address nothing listens on
pub(crate) fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Connected(ConnectionId),
    ConnectError(ConnectionId, SocketAddr),
    Closed(ConnectionId),
    Message(ConnectionId),
    WriteDone(ConnectionId),
}

type QuitWhen = Box<dyn Fn(&Event) -> bool>;

/// Transport handler that records notifications and can stop the loop
pub(crate) struct Recorder {
    ev: Weak<EventLoop>,
    events: RefCell<Vec<Event>>,
    quit_when: RefCell<Option<QuitWhen>>,
    guard: Cell<Option<TimerId>>,
}

impl Recorder {
    pub(crate) fn new(ev: &Rc<EventLoop>) -> Rc<Self> {
        Rc::new(Self {
            ev: Rc::downgrade(ev),
            events: RefCell::new(Vec::new()),
            quit_when: RefCell::new(None),
            guard: Cell::new(None),
        })
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Quit the loop on the next event matching `pred`, or after 5s
    pub(crate) fn quit_on<F: Fn(&Event) -> bool + 'static>(&self, pred: F) {
        *self.quit_when.borrow_mut() = Some(Box::new(pred));
        let Some(ev) = self.ev.upgrade() else {
            return;
        };
        if let Some(old) = self.guard.take() {
            ev.remove_timer(old);
        }
        let weak = self.ev.clone();
        self.guard.set(Some(ev.run_after(5000, move || {
            if let Some(ev) = weak.upgrade() {
                ev.quit();
            }
        })));
    }

    fn record(&self, event: Event) {
        let hit = self
            .quit_when
            .borrow()
            .as_ref()
            .map(|pred| pred(&event))
            .unwrap_or(false);
        self.events.borrow_mut().push(event);
        if hit {
            self.quit_when.borrow_mut().take();
            if let Some(ev) = self.ev.upgrade() {
                ev.quit();
            }
        }
    }
}

impl TransportHandler for Recorder {
    fn on_connected(&self, id: ConnectionId) {
        self.record(Event::Connected(id));
    }

    fn on_connect_error(&self, id: ConnectionId, addr: SocketAddr) {
        self.record(Event::ConnectError(id, addr));
    }

    fn on_closed(&self, id: ConnectionId) {
        self.record(Event::Closed(id));
    }

    fn on_message(&self, id: ConnectionId) {
        self.record(Event::Message(id));
    }

    fn on_write_done(&self, id: ConnectionId) {
        self.record(Event::WriteDone(id));
    }
}

/// Stop `ev` after `ms`, so a broken test fails instead of hanging
pub(crate) fn quit_after(ev: &Rc<EventLoop>, ms: u64) {
    let weak = Rc::downgrade(ev);
    ev.run_after(ms, move || {
        if let Some(ev) = weak.upgrade() {
            ev.quit();
        }
    });
}

struct MockConn {
    peer: SocketAddr,
    open: bool,
    read: Vec<u8>,
    sent: Vec<u8>,
    pending: usize,
}

/// In-memory transport; every notification is delivered from the loop
pub(crate) struct MockTransport {
    ev: Rc<EventLoop>,
    me: Weak<MockTransport>,
    handler: RefCell<Option<Weak<dyn TransportHandler>>>,
    next_id: Cell<u64>,
    conns: RefCell<HashMap<ConnectionId, MockConn>>,
    refused: RefCell<Vec<SocketAddr>>,
    delays: RefCell<HashMap<SocketAddr, u64>>,
    write_capacity: Cell<usize>,
    connects: Cell<usize>,
}

impl MockTransport {
    pub(crate) fn new(ev: &Rc<EventLoop>) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            ev: Rc::clone(ev),
            me: me.clone(),
            handler: RefCell::new(None),
            next_id: Cell::new(1),
            conns: RefCell::new(HashMap::new()),
            refused: RefCell::new(Vec::new()),
            delays: RefCell::new(HashMap::new()),
            write_capacity: Cell::new(usize::MAX),
            connects: Cell::new(0),
        })
    }

    pub(crate) fn refuse(&self, addr: SocketAddr) {
        self.refused.borrow_mut().push(addr);
    }

    /// Resolve connects to `addr` after `ms` instead of on the next iteration
    pub(crate) fn delay(&self, addr: SocketAddr, ms: u64) {
        self.delays.borrow_mut().insert(addr, ms);
    }

    /// Most bytes a connection holds unsent before `write` stops accepting
    pub(crate) fn set_write_capacity(&self, n: usize) {
        self.write_capacity.set(n);
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.connects.get()
    }

    pub(crate) fn sent(&self, id: ConnectionId) -> Vec<u8> {
        self.conns.borrow().get(&id).map(|c| c.sent.clone()).unwrap_or_default()
    }

    pub(crate) fn is_open(&self, id: ConnectionId) -> bool {
        self.conns.borrow().get(&id).map(|c| c.open).unwrap_or(false)
    }

    /// Peer sends `bytes`
    pub(crate) fn deliver(&self, id: ConnectionId, bytes: &[u8]) {
        if let Some(conn) = self.conns.borrow_mut().get_mut(&id) {
            conn.read.extend_from_slice(bytes);
        }
        self.later(move |h| h.on_message(id));
    }

    /// Peer hangs up
    pub(crate) fn hang_up(&self, id: ConnectionId) {
        if let Some(conn) = self.conns.borrow_mut().get_mut(&id) {
            conn.open = false;
        }
        self.later(move |h| h.on_closed(id));
    }

    fn later<F: FnOnce(&dyn TransportHandler) + 'static>(&self, f: F) {
        let me = self.me.clone();
        self.ev.queue_in_loop(move || {
            let Some(me) = me.upgrade() else {
                return;
            };
            let handler = me.handler.borrow().as_ref().and_then(Weak::upgrade);
            if let Some(handler) = handler {
                f(&*handler);
            }
        });
    }

    fn resolve(&self, id: ConnectionId, addr: SocketAddr) {
        if self.refused.borrow().contains(&addr) {
            self.later(move |h| h.on_connect_error(id, addr));
            return;
        }
        self.conns.borrow_mut().insert(
            id,
            MockConn {
                peer: addr,
                open: true,
                read: Vec::new(),
                sent: Vec::new(),
                pending: 0,
            },
        );
        self.later(move |h| h.on_connected(id));
    }

    fn drain(&self, id: ConnectionId) {
        let drained = match self.conns.borrow_mut().get_mut(&id) {
            Some(conn) if conn.pending > 0 => {
                conn.pending = 0;
                true
            }
            _ => false,
        };
        if drained {
            self.later(move |h| h.on_write_done(id));
        }
    }
}

impl Transport for MockTransport {
    fn set_handler(&self, handler: Weak<dyn TransportHandler>) {
        *self.handler.borrow_mut() = Some(handler);
    }

    fn connect(&self, addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId::new(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.connects.set(self.connects.get() + 1);

        let me = self.me.clone();
        let resolve = move || {
            if let Some(me) = me.upgrade() {
                me.resolve(id, addr);
            }
        };
        match self.delays.borrow().get(&addr) {
            Some(&ms) => {
                self.ev.run_after(ms, resolve);
            }
            None => self.ev.queue_in_loop(resolve),
        }
        id
    }

    fn write(&self, id: ConnectionId, data: &[u8]) -> usize {
        let accepted = {
            let mut conns = self.conns.borrow_mut();
            let Some(conn) = conns.get_mut(&id) else {
                return 0;
            };
            if !conn.open {
                return 0;
            }
            let room = self.write_capacity.get().saturating_sub(conn.pending);
            let n = room.min(data.len());
            conn.sent.extend_from_slice(&data[..n]);
            conn.pending += n;
            n
        };
        if accepted > 0 {
            // The peer drains everything shortly after
            let me = self.me.clone();
            self.ev.run_after(1, move || {
                if let Some(me) = me.upgrade() {
                    me.drain(id);
                }
            });
        }
        accepted
    }

    fn close(&self, id: ConnectionId) {
        let was_open = match self.conns.borrow_mut().get_mut(&id) {
            Some(conn) if conn.open => {
                conn.open = false;
                conn.pending = 0;
                true
            }
            Some(_) => false,
            None => return,
        };
        if was_open {
            self.later(move |h| h.on_closed(id));
        } else {
            self.conns.borrow_mut().remove(&id);
        }
    }

    fn release(&self, id: ConnectionId) {
        self.conns.borrow_mut().remove(&id);
    }

    fn with_read_buffer(&self, id: ConnectionId, consume: &mut dyn FnMut(&[u8]) -> usize) -> usize {
        let mut conns = self.conns.borrow_mut();
        let Some(conn) = conns.get_mut(&id) else {
            return 0;
        };
        let n = consume(&conn.read).min(conn.read.len());
        conn.read.drain(..n);
        n
    }

    fn pending_write(&self, id: ConnectionId) -> usize {
        self.conns.borrow().get(&id).map(|c| c.pending).unwrap_or(0)
    }

    fn peer_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.conns.borrow().get(&id).map(|c| c.peer)
    }
}
