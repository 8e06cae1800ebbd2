//! Timer entry and callback types

use std::fmt;
use std::rc::Rc;

use costack_core::TimerId;

use crate::time::TimeStamp;

/// Callback attached to a timer
pub(crate) enum TimerCallback {
    /// Runs once, then the timer is retired
    Once(Box<dyn FnOnce()>),

    /// Runs on every expiry
    Repeat(Rc<dyn Fn()>),
}

/// A registered timer
pub(crate) struct TimerEntry {
    /// Next expiry on the monotonic clock
    pub expire: TimeStamp,

    /// Repeat interval in ms; 0 means one-shot
    pub interval: u64,

    pub callback: TimerCallback,
}

impl TimerEntry {
    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.interval > 0
    }

    /// Next slot on the nominal grid strictly after `now`
    ///
    /// Missed ticks are skipped rather than replayed.
    pub fn next_expire_after(&self, now: TimeStamp) -> TimeStamp {
        let next = self.expire + self.interval;
        if next > now {
            return next;
        }
        let missed = (now - self.expire) / self.interval;
        self.expire + (missed + 1) * self.interval
    }
}

/// A timer returned by `TimerManager::step`, ready to fire
pub struct ExpiredTimer {
    pub id: TimerId,

    /// The expiry that made this timer due
    pub expire: TimeStamp,

    callback: FiredCallback,
}

enum FiredCallback {
    Once(Box<dyn FnOnce()>),
    Repeat(Rc<dyn Fn()>),
}

impl ExpiredTimer {
    pub(crate) fn once(id: TimerId, expire: TimeStamp, f: Box<dyn FnOnce()>) -> Self {
        Self { id, expire, callback: FiredCallback::Once(f) }
    }

    pub(crate) fn repeat(id: TimerId, expire: TimeStamp, f: Rc<dyn Fn()>) -> Self {
        Self { id, expire, callback: FiredCallback::Repeat(f) }
    }

    /// Run the callback
    pub fn fire(self) {
        match self.callback {
            FiredCallback::Once(f) => f(),
            FiredCallback::Repeat(f) => f(),
        }
    }
}

impl fmt::Debug for ExpiredTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiredTimer")
            .field("id", &self.id)
            .field("expire", &self.expire)
            .finish()
    }
}
