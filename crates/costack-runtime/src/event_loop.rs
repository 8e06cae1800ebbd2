//! The reactor
//!
//! One `EventLoop` per thread. Each iteration runs, in order:
//!
//! ```text
//!   1. poll            wait for readiness (bounded by the current timeout)
//!   2. signals         run handlers of trapped signals that arrived
//!   3. channels        handle_events() on every ready channel
//!   4. idle counter    +1 on an empty poll, reset otherwise
//!   5. status callback user hook: Idle or Busy
//!   6. deferred        swap out queue_in_loop() closures and run them,
//!                      then closures sent through a LoopHandle
//!   7. timers          fire everything due at the poll timestamp
//! ```
//!
//! The poll timeout is the busy timeout until `idle_threshold` consecutive
//! empty polls have happened with an Idle status, then the idle timeout.
//! The actual wait is further capped by the earliest timer and is zero
//! while deferred closures are pending.
//!
//! The loop is `!Send`. All methods take `&self`; state lives in cells and
//! no borrow is held while user code runs, so callbacks may freely call
//! back into the loop.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use costack_core::error::{RuntimeError, RuntimeResult};
use costack_core::{kinfo, kwarn, LoopStatus, TimerId};

use crate::channel::Channel;
use crate::config::LoopConfig;
use crate::coroutine::SharedStack;
use crate::poller::Poller;
use crate::remote::{LoopHandle, Remote, RemoteShared};
use crate::signal::{self, Signal};
use crate::time::{self, TimeStamp};
use crate::timer::TimerManager;

/// Deferred closure
pub type Functor = Box<dyn FnOnce()>;

/// Per-iteration hook; receives the iteration number
pub type StatusCallback = Box<dyn FnMut(u64) -> LoopStatus>;

type SignalHandler = Box<dyn FnMut()>;

pub struct EventLoop {
    poller: RefCell<Poller>,
    timers: RefCell<TimerManager>,
    functors: RefCell<Vec<Functor>>,
    status_cb: RefCell<Option<StatusCallback>>,
    signal_handlers: RefCell<HashMap<i32, SignalHandler>>,
    trapped: Cell<u64>,
    remote: RefCell<Option<Remote>>,
    active: RefCell<Vec<Rc<Channel>>>,
    stack: Rc<SharedStack>,

    quit: Cell<bool>,
    running: Cell<bool>,
    iteration: Cell<u64>,
    busy_timeout: Cell<i32>,
    idle_timeout: Cell<i32>,
    idle_threshold: Cell<u64>,
    idle_count: Cell<u64>,
    poll_timeout: Cell<i32>,
}

impl EventLoop {
    /// Loop configured from the environment
    pub fn new() -> RuntimeResult<Rc<Self>> {
        Self::with_config(LoopConfig::from_env())
    }

    pub fn with_config(config: LoopConfig) -> RuntimeResult<Rc<Self>> {
        config.validate()?;
        let poller = Poller::new(config.poll_events)?;
        let stack = SharedStack::new(config.shared_stack_size)?;

        Ok(Rc::new(Self {
            poller: RefCell::new(poller),
            timers: RefCell::new(TimerManager::new()),
            functors: RefCell::new(Vec::new()),
            status_cb: RefCell::new(None),
            signal_handlers: RefCell::new(HashMap::new()),
            trapped: Cell::new(0),
            remote: RefCell::new(None),
            active: RefCell::new(Vec::new()),
            stack,
            quit: Cell::new(false),
            running: Cell::new(false),
            iteration: Cell::new(0),
            busy_timeout: Cell::new(config.busy_timeout_ms),
            idle_timeout: Cell::new(config.idle_timeout_ms),
            idle_threshold: Cell::new(config.idle_threshold),
            idle_count: Cell::new(0),
            poll_timeout: Cell::new(config.busy_timeout_ms),
        }))
    }

    /// Iterate until `quit()` is called
    ///
    /// The quit request is consumed on exit, so the loop can be run again.
    ///
    /// # Panics
    ///
    /// If called from inside the loop it drives.
    pub fn run(&self) {
        assert!(!self.running.replace(true), "EventLoop::run called re-entrantly");
        while !self.take_quit_request() {
            self.run_once();
        }
        self.running.set(false);
        kinfo!("event loop exiting after {} iterations", self.iteration.get());
    }

    /// Run exactly one iteration
    pub fn run_once(&self) {
        let timeout = self.effective_timeout();
        let mut active = self.active.take();
        let now = self.poller.borrow_mut().poll(timeout, &mut active);

        if self.dispatch_signals() && self.quit.get() {
            active.clear();
            *self.active.borrow_mut() = active;
            return;
        }

        self.iteration.set(self.iteration.get() + 1);

        for channel in &active {
            if channel.is_registered() {
                channel.handle_events();
            }
        }
        let idle = if active.is_empty() { self.idle_count.get() + 1 } else { 0 };
        self.idle_count.set(idle);
        active.clear();
        *self.active.borrow_mut() = active;

        let status = self.run_status_callback();
        self.run_functors();
        self.run_remote_functors();
        self.run_timers(now);

        let next = if idle >= self.idle_threshold.get() && status == LoopStatus::Idle {
            self.idle_timeout.get()
        } else {
            self.busy_timeout.get()
        };
        self.poll_timeout.set(next);
    }

    /// Stop after the current iteration
    pub fn quit(&self) {
        self.quit.set(true);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Iterations completed so far
    #[inline]
    pub fn iteration(&self) -> u64 {
        self.iteration.get()
    }

    /// Timeout policy for the next poll, before timer and deferred capping
    #[inline]
    pub fn poll_timeout(&self) -> i32 {
        self.poll_timeout.get()
    }

    /// Consecutive empty polls so far
    #[inline]
    pub fn idle_count(&self) -> u64 {
        self.idle_count.get()
    }

    /// The shared stack coroutines of this loop run on
    pub fn shared_stack(&self) -> &Rc<SharedStack> {
        &self.stack
    }

    // Deferred calls

    /// Run `f` on a later pass of this loop
    pub fn queue_in_loop<F: FnOnce() + 'static>(&self, f: F) {
        self.functors.borrow_mut().push(Box::new(f));
    }

    pub fn pending_functors(&self) -> usize {
        self.functors.borrow().len()
    }

    // Timers

    /// Run `f` once at `expire`
    pub fn run_at<F: FnOnce() + 'static>(&self, expire: TimeStamp, f: F) -> TimerId {
        self.timers.borrow_mut().add_timer(expire, f)
    }

    /// Run `f` once, `ms` milliseconds from now
    pub fn run_after<F: FnOnce() + 'static>(&self, ms: u64, f: F) -> TimerId {
        self.run_at(time::now() + ms, f)
    }

    /// Run `f` every `ms` milliseconds, first `ms` from now
    pub fn run_every<F: Fn() + 'static>(&self, ms: u64, f: F) -> TimerId {
        self.timers.borrow_mut().add_periodic_timer(time::now() + ms, ms, f)
    }

    pub fn remove_timer(&self, id: TimerId) {
        self.timers.borrow_mut().remove_timer(id);
    }

    pub fn expired(&self, id: TimerId) -> bool {
        self.timers.borrow().expired(id)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    // Scheduling policy

    pub fn set_busy_timeout(&self, ms: i32) {
        self.busy_timeout.set(ms);
        if self.idle_count.get() < self.idle_threshold.get() {
            self.poll_timeout.set(ms);
        }
    }

    pub fn set_idle_timeout(&self, ms: i32) {
        self.idle_timeout.set(ms);
    }

    pub fn set_idle_threshold(&self, n: u64) {
        self.idle_threshold.set(n);
    }

    /// Install the per-iteration status hook, replacing any previous one
    pub fn set_status_callback<F>(&self, f: F)
    where
        F: FnMut(u64) -> LoopStatus + 'static,
    {
        *self.status_cb.borrow_mut() = Some(Box::new(f));
    }

    // Signals and cross-thread access

    /// Run `f` on this loop whenever `sig` is delivered
    ///
    /// Only allowed before the first iteration. Trapping the same signal
    /// again replaces its handler.
    pub fn trap_signal<F>(self: &Rc<Self>, sig: Signal, f: F) -> RuntimeResult<()>
    where
        F: FnMut() + 'static,
    {
        if self.iteration.get() != 0 {
            return Err(RuntimeError::LoopStarted);
        }
        let signo = sig as i32;
        let bit = signal::signal_bit(signo);

        if self.trapped.get() & bit == 0 {
            let shared = self.ensure_remote()?;
            if let Err(e) = signal::install(sig, shared.wake_fd()) {
                kwarn!("trap_signal failed, signal = {:?}: {}", sig, e);
                return Err(e);
            }
            self.trapped.set(self.trapped.get() | bit);
        }
        self.signal_handlers.borrow_mut().insert(signo, Box::new(f));
        Ok(())
    }

    /// Thread-safe handle for queueing work and quitting from elsewhere
    pub fn handle(self: &Rc<Self>) -> RuntimeResult<LoopHandle> {
        Ok(LoopHandle::new(self.ensure_remote()?))
    }

    // Channel registration, called by Channel

    pub(crate) fn update_channel(&self, channel: &Rc<Channel>) -> RuntimeResult<()> {
        self.poller.borrow_mut().update_channel(channel)
    }

    pub(crate) fn remove_channel(&self, channel: &Channel) -> RuntimeResult<()> {
        match self.poller.try_borrow_mut() {
            Ok(mut poller) => poller.remove_channel(channel),
            Err(_) => {
                kwarn!("channel fd {} removed while the poller is busy", channel.fd());
                Ok(())
            }
        }
    }

    pub fn has_channel(&self, fd: RawFd) -> bool {
        self.poller.borrow().has_channel(fd)
    }

    // Internals

    fn ensure_remote(self: &Rc<Self>) -> RuntimeResult<Arc<RemoteShared>> {
        if let Some(remote) = self.remote.borrow().as_ref() {
            return Ok(remote.shared.clone());
        }

        let shared = RemoteShared::new()?;
        let channel = Channel::new(self, shared.wake_fd());
        let waker = shared.clone();
        channel.set_read_callback(move || waker.drain_wakeups());
        channel.enable_reading()?;

        *self.remote.borrow_mut() = Some(Remote {
            shared: shared.clone(),
            channel,
        });
        Ok(shared)
    }

    fn remote_shared(&self) -> Option<Arc<RemoteShared>> {
        self.remote.borrow().as_ref().map(|r| r.shared.clone())
    }

    fn take_quit_request(&self) -> bool {
        if let Some(shared) = self.remote_shared() {
            if shared.take_quit() {
                self.quit.set(true);
            }
        }
        self.quit.replace(false)
    }

    fn effective_timeout(&self) -> i32 {
        if !self.functors.borrow().is_empty() {
            return 0;
        }
        let mut timeout = self.poll_timeout.get();
        if let Some(expire) = self.timers.borrow().next_expiry() {
            let until = expire.saturating_sub(time::now()).min(i32::MAX as u64) as i32;
            if timeout < 0 || until < timeout {
                timeout = until;
            }
        }
        timeout
    }

    /// Returns true if any trapped signal was handled
    fn dispatch_signals(&self) -> bool {
        let pending = signal::take_pending(self.trapped.get());
        if pending == 0 {
            return false;
        }
        for signo in 1..64 {
            if pending & signal::signal_bit(signo) == 0 {
                continue;
            }
            let handler = self.signal_handlers.borrow_mut().remove(&signo);
            if let Some(mut handler) = handler {
                handler();
                self.signal_handlers
                    .borrow_mut()
                    .entry(signo)
                    .or_insert(handler);
            }
        }
        true
    }

    fn run_status_callback(&self) -> LoopStatus {
        let cb = self.status_cb.borrow_mut().take();
        let Some(mut cb) = cb else {
            return LoopStatus::Idle;
        };
        let status = cb(self.iteration.get());
        let mut slot = self.status_cb.borrow_mut();
        if slot.is_none() {
            *slot = Some(cb);
        }
        status
    }

    fn run_functors(&self) {
        let functors = std::mem::take(&mut *self.functors.borrow_mut());
        for f in functors {
            f();
        }
    }

    fn run_remote_functors(&self) {
        if let Some(shared) = self.remote_shared() {
            shared.run_queued();
        }
    }

    fn run_timers(&self, now: TimeStamp) {
        let fired = self.timers.borrow_mut().step(now);
        for timer in fired {
            if self.timers.borrow().is_due(timer.id) {
                timer.fire();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Rc<Self> {
        Self::with_config(
            LoopConfig::new().shared_stack_size(costack_core::constants::MIN_STACK_SIZE * 4),
        )
        .unwrap()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("iteration", &self.iteration.get())
            .field("poll_timeout", &self.poll_timeout.get())
            .field("idle_count", &self.idle_count.get())
            .field("timers", &self.timers.borrow().len())
            .field("pending_functors", &self.functors.borrow().len())
            .finish()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let trapped = self.trapped.get();
        for signo in 1..64 {
            if trapped & signal::signal_bit(signo) != 0 {
                signal::restore_default(signo);
            }
        }
        if let Some(remote) = self.remote.get_mut().take() {
            signal::clear_wake_fd(remote.shared.wake_fd());
            remote.channel.clear_callbacks();
            if let Err(e) = remote.channel.remove() {
                kwarn!("event loop: removing wakeup channel failed: {}", e);
            }
        }
    }
}
