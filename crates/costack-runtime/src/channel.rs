//! Readiness registration for one file descriptor
//!
//! A `Channel` ties an fd's epoll interest set to read, write and error
//! callbacks. It does not own the fd. The owner must call `remove()`
//! before closing the fd; a channel dropped while still registered is
//! removed with a warning.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use costack_core::error::RuntimeResult;
use costack_core::{kdebug, kwarn};

use crate::event_loop::EventLoop;

pub const READ_EVENTS: u32 = (libc::EPOLLIN | libc::EPOLLPRI) as u32;
pub const WRITE_EVENTS: u32 = libc::EPOLLOUT as u32;
pub const ERROR_EVENTS: u32 = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
pub const NONE_EVENTS: u32 = 0;

type EventCallback = Rc<dyn Fn()>;

pub struct Channel {
    owner: Weak<EventLoop>,
    fd: RawFd,
    events: Cell<u32>,
    revents: Cell<u32>,
    registered: Cell<bool>,
    handling: Cell<bool>,
    read_cb: RefCell<Option<EventCallback>>,
    write_cb: RefCell<Option<EventCallback>>,
    error_cb: RefCell<Option<EventCallback>>,
}

impl Channel {
    /// Channel for `fd` on `ev`. Nothing is registered until an
    /// interest is enabled.
    pub fn new(ev: &Rc<EventLoop>, fd: RawFd) -> Rc<Self> {
        Self::with_owner(Rc::downgrade(ev), fd)
    }

    pub(crate) fn with_owner(owner: Weak<EventLoop>, fd: RawFd) -> Rc<Self> {
        Rc::new(Self {
            owner,
            fd,
            events: Cell::new(NONE_EVENTS),
            revents: Cell::new(0),
            registered: Cell::new(false),
            handling: Cell::new(false),
            read_cb: RefCell::new(None),
            write_cb: RefCell::new(None),
            error_cb: RefCell::new(None),
        })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Current interest mask
    #[inline]
    pub fn events(&self) -> u32 {
        self.events.get()
    }

    /// Mask received by the last poll
    #[inline]
    pub fn revents(&self) -> u32 {
        self.revents.get()
    }

    #[inline]
    pub(crate) fn set_revents(&self, revents: u32) {
        self.revents.set(revents);
    }

    #[inline]
    pub fn is_registered(&self) -> bool {
        self.registered.get()
    }

    #[inline]
    pub fn is_reading(&self) -> bool {
        self.events.get() & READ_EVENTS != 0
    }

    #[inline]
    pub fn is_writing(&self) -> bool {
        self.events.get() & WRITE_EVENTS != 0
    }

    #[inline]
    pub fn is_none_event(&self) -> bool {
        self.events.get() == NONE_EVENTS
    }

    pub fn set_read_callback<F: Fn() + 'static>(&self, f: F) {
        *self.read_cb.borrow_mut() = Some(Rc::new(f));
    }

    pub fn set_write_callback<F: Fn() + 'static>(&self, f: F) {
        *self.write_cb.borrow_mut() = Some(Rc::new(f));
    }

    pub fn set_error_callback<F: Fn() + 'static>(&self, f: F) {
        *self.error_cb.borrow_mut() = Some(Rc::new(f));
    }

    /// Drop all callbacks, releasing whatever they capture
    pub fn clear_callbacks(&self) {
        self.read_cb.borrow_mut().take();
        self.write_cb.borrow_mut().take();
        self.error_cb.borrow_mut().take();
    }

    pub fn enable_reading(self: &Rc<Self>) -> RuntimeResult<()> {
        self.events.set(self.events.get() | READ_EVENTS);
        self.update()
    }

    pub fn disable_reading(self: &Rc<Self>) -> RuntimeResult<()> {
        self.events.set(self.events.get() & !READ_EVENTS);
        self.update()
    }

    pub fn enable_writing(self: &Rc<Self>) -> RuntimeResult<()> {
        self.events.set(self.events.get() | WRITE_EVENTS);
        self.update()
    }

    pub fn disable_writing(self: &Rc<Self>) -> RuntimeResult<()> {
        self.events.set(self.events.get() & !WRITE_EVENTS);
        self.update()
    }

    pub fn disable_all(self: &Rc<Self>) -> RuntimeResult<()> {
        self.events.set(NONE_EVENTS);
        self.update()
    }

    /// Push the interest mask to the owning loop's poller
    pub fn update(self: &Rc<Self>) -> RuntimeResult<()> {
        let Some(ev) = self.owner.upgrade() else {
            return Ok(());
        };
        ev.update_channel(self)?;
        self.registered.set(true);
        Ok(())
    }

    /// Deregister from the owning loop. No-op if not registered.
    pub fn remove(&self) -> RuntimeResult<()> {
        if !self.registered.replace(false) {
            return Ok(());
        }
        match self.owner.upgrade() {
            Some(ev) => ev.remove_channel(self),
            None => Ok(()),
        }
    }

    /// Dispatch the received mask: errors first, then write, then read
    ///
    /// Stops early if a callback removed the channel.
    pub fn handle_events(&self) {
        let revents = self.revents.get();
        self.handling.set(true);

        if revents & ERROR_EVENTS != 0 {
            let cb = self.error_cb.borrow().clone();
            match cb {
                Some(cb) => cb(),
                None => kwarn!("channel: got error for fd {} ({})", self.fd, self.readable_events()),
            }
        }

        if revents & WRITE_EVENTS != 0 && self.registered.get() {
            let cb = self.write_cb.borrow().clone();
            if let Some(cb) = cb {
                cb();
            }
        }

        if revents & READ_EVENTS != 0 && self.registered.get() {
            let cb = self.read_cb.borrow().clone();
            if let Some(cb) = cb {
                cb();
            }
        }

        self.handling.set(false);
    }

    /// Received mask rendered for logs
    pub fn readable_events(&self) -> String {
        let revents = self.revents.get();
        let names = [
            (libc::EPOLLIN, "EPOLLIN"),
            (libc::EPOLLOUT, "EPOLLOUT"),
            (libc::EPOLLPRI, "EPOLLPRI"),
            (libc::EPOLLERR, "EPOLLERR"),
            (libc::EPOLLHUP, "EPOLLHUP"),
            (libc::EPOLLRDHUP, "EPOLLRDHUP"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| revents & *bit as u32 != 0)
            .map(|(_, name)| *name)
            .collect();
        format!("revents = {}", set.join(" "))
    }

    #[cfg(test)]
    pub(crate) fn set_events_for_test(&self, events: u32) {
        self.events.set(events);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("fd", &self.fd)
            .field("events", &format_args!("{:#x}", self.events.get()))
            .field("registered", &self.registered.get())
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        assert!(
            !self.handling.get(),
            "channel for fd {} destroyed while handling events",
            self.fd
        );
        if self.registered.get() {
            kwarn!("channel: fd {} dropped while registered", self.fd);
            if let Err(e) = self.remove() {
                kdebug!("channel: late removal of fd {} failed: {}", self.fd, e);
            }
        }
    }
}
