//! Coroutines that can suspend with a deadline
//!
//! `AsyncCoroutine` wraps a runtime `Coroutine` bound to an event loop.
//! `yield_with_timeout` arms a one-shot loop timer before suspending; the
//! timer resumes the coroutine only if nothing else did first, and any
//! `resume()` disarms it.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use costack_core::{CoroutineId, CoroutineState, TimerId};
use costack_runtime::{Coroutine, EventLoop};

struct CoroutineInner {
    co: Rc<Coroutine>,
    ev: Rc<EventLoop>,
    timer: Cell<Option<TimerId>>,
    timed_out: Cell<bool>,
}

impl CoroutineInner {
    fn cancel_timer(&self) {
        if let Some(id) = self.timer.take() {
            self.ev.remove_timer(id);
        }
    }
}

/// Shared handle to a coroutine driven by an event loop
#[derive(Clone)]
pub struct AsyncCoroutine {
    inner: Rc<CoroutineInner>,
}

impl AsyncCoroutine {
    /// Create a suspended coroutine on `ev`'s shared stack
    pub fn new<F>(ev: &Rc<EventLoop>, f: F) -> Self
    where
        F: FnOnce(&AsyncCoroutine) + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<CoroutineInner>| {
            let weak = weak.clone();
            let co = Coroutine::new(ev.shared_stack(), move |_| {
                if let Some(inner) = weak.upgrade() {
                    f(&AsyncCoroutine { inner });
                }
            });
            CoroutineInner {
                co,
                ev: Rc::clone(ev),
                timer: Cell::new(None),
                timed_out: Cell::new(false),
            }
        });
        AsyncCoroutine { inner }
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.inner.co.id()
    }

    #[inline]
    pub fn state(&self) -> CoroutineState {
        self.inner.co.state()
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.inner.co.is_suspended()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.inner.co.is_dead()
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.inner.ev
    }

    /// Disarm a pending timeout, then run the coroutine until it yields
    pub fn resume(&self) {
        self.inner.cancel_timer();
        self.inner.co.resume();
    }

    /// Suspend with no deadline
    pub fn yield_now(&self) {
        self.inner.timed_out.set(false);
        self.inner.co.yield_now();
    }

    /// Suspend until resumed or until `ms` elapse, whichever comes first
    ///
    /// Check `timed_out()` afterwards to tell the two apart.
    pub fn yield_with_timeout(&self, ms: u64) {
        self.inner.timed_out.set(false);
        self.inner.cancel_timer();

        let weak = Rc::downgrade(&self.inner);
        let id = self.inner.ev.run_after(ms, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.timer.set(None);
            if inner.co.is_suspended() {
                inner.timed_out.set(true);
                inner.co.resume();
            }
        });
        self.inner.timer.set(Some(id));
        self.inner.co.yield_now();
    }

    /// Whether the last suspension ended because its timer fired
    #[inline]
    pub fn timed_out(&self) -> bool {
        self.inner.timed_out.get()
    }

    /// Whether a timeout is currently armed
    #[inline]
    pub fn has_timer(&self) -> bool {
        self.inner.timer.get().is_some()
    }
}

impl fmt::Debug for AsyncCoroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCoroutine")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("timer", &self.inner.timer.get())
            .field("timed_out", &self.inner.timed_out.get())
            .finish()
    }
}
