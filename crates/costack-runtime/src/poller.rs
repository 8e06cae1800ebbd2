//! epoll wrapper
//!
//! The poller maps each registered fd to a weak reference to its
//! `Channel`. A wait fills the caller's list with the channels that have
//! pending events, each with its received mask already stored.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};

use nix::errno::Errno;

use costack_core::error::{RuntimeError, RuntimeResult};
use costack_core::{kerror, ktrace};

use crate::channel::Channel;
use crate::time::{self, TimeStamp};

const EMPTY_EVENT: libc::epoll_event = libc::epoll_event { events: 0, u64: 0 };

pub struct Poller {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
    channels: HashMap<RawFd, Weak<Channel>>,
}

impl Poller {
    /// Create an epoll instance with room for `initial_events` events
    pub fn new(initial_events: usize) -> RuntimeResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(RuntimeError::Os(Errno::last() as i32));
        }
        Ok(Self {
            epfd,
            events: vec![EMPTY_EVENT; initial_events.max(1)],
            channels: HashMap::new(),
        })
    }

    /// Wait up to `timeout_ms` (-1 blocks) and collect ready channels
    ///
    /// Returns the time right after the wait. An interrupted wait reports
    /// no channels and is not an error.
    pub fn poll(&mut self, timeout_ms: i32, active: &mut Vec<Rc<Channel>>) -> TimeStamp {
        let n = unsafe {
            libc::epoll_wait(
                self.epfd,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        let errno = Errno::last();
        let now = time::now();

        if n > 0 {
            let n = n as usize;
            for ev in &self.events[..n] {
                let ev = *ev;
                let fd = ev.u64 as RawFd;
                let revents = ev.events;
                match self.channels.get(&fd).and_then(Weak::upgrade) {
                    Some(channel) => {
                        channel.set_revents(revents);
                        active.push(channel);
                    }
                    None => ktrace!("poller: event {:#x} for stale fd {}", revents, fd),
                }
            }
            if n == self.events.len() {
                let len = self.events.len() * 2;
                self.events.resize(len, EMPTY_EVENT);
            }
        } else if n < 0 && errno != Errno::EINTR {
            kerror!("poller: epoll_wait failed: {}", errno);
        }

        now
    }

    /// Register `channel` or update its interest set
    pub fn update_channel(&mut self, channel: &Rc<Channel>) -> RuntimeResult<()> {
        let fd = channel.fd();
        if self.channels.contains_key(&fd) {
            match self.ctl(libc::EPOLL_CTL_MOD, fd, channel.events()) {
                // The fd was closed and reused without removal
                Err(RuntimeError::Os(code)) if code == libc::ENOENT => {
                    self.ctl(libc::EPOLL_CTL_ADD, fd, channel.events())?
                }
                other => other?,
            }
        } else {
            self.ctl(libc::EPOLL_CTL_ADD, fd, channel.events())?;
        }
        self.channels.insert(fd, Rc::downgrade(channel));
        Ok(())
    }

    /// Deregister `channel`
    ///
    /// # Panics
    ///
    /// If the fd was never registered.
    pub fn remove_channel(&mut self, channel: &Channel) -> RuntimeResult<()> {
        let fd = channel.fd();
        assert!(
            self.channels.remove(&fd).is_some(),
            "poller: removing unregistered fd {}",
            fd
        );
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0)
    }

    pub fn has_channel(&self, fd: RawFd) -> bool {
        self.channels.contains_key(&fd)
    }

    /// Registered fds
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Current event buffer length
    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> RuntimeResult<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(RuntimeError::Os(Errno::last() as i32));
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}
