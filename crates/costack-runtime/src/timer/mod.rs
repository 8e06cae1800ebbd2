//! Timer subsystem
//!
//! Ordered one-shot and periodic timers for a single reactor thread.
//!
//! ```text
//!   queue:   BTreeSet<(expire, id)>   -- ordering, earliest first
//!   entries: HashMap<id, TimerEntry>  -- callback, interval, lookup
//! ```
//!
//! Both structures are always updated together. Ties on `expire` are
//! broken by id, so timers added earlier fire first.
//!
//! # Periodic timers
//!
//! A periodic timer stays on its nominal grid: after firing, its expiry is
//! advanced in whole intervals from the previous target, never rebased to
//! the current time. If several intervals elapsed since the last `step`,
//! the timer still fires once and the missed ticks are dropped.
//! A timer added at 0 with interval 50 and first stepped at 205 fires
//! once and is next due at 250. It does not catch up by firing on each
//! of the following steps, as advancing by a single interval per firing
//! would.

mod entry;

pub use entry::ExpiredTimer;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use costack_core::TimerId;

use crate::time::TimeStamp;
use entry::{TimerCallback, TimerEntry};

/// Timer bookkeeping for one reactor
pub struct TimerManager {
    queue: BTreeSet<(TimeStamp, TimerId)>,
    entries: HashMap<TimerId, TimerEntry>,

    /// Ids handed out by the latest `step` that have not been cancelled
    due: HashSet<TimerId>,

    last_id: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            queue: BTreeSet::new(),
            entries: HashMap::new(),
            due: HashSet::new(),
            last_id: 0,
        }
    }

    fn next_id(&mut self) -> TimerId {
        self.last_id += 1;
        TimerId::new(self.last_id)
    }

    fn insert(&mut self, entry: TimerEntry) -> TimerId {
        let id = self.next_id();
        self.queue.insert((entry.expire, id));
        self.entries.insert(id, entry);
        id
    }

    /// Add a one-shot timer firing at `expire`
    pub fn add_timer<F>(&mut self, expire: TimeStamp, f: F) -> TimerId
    where
        F: FnOnce() + 'static,
    {
        self.insert(TimerEntry {
            expire,
            interval: 0,
            callback: TimerCallback::Once(Box::new(f)),
        })
    }

    /// Add a timer first firing at `expire`, then every `interval` ms.
    /// An interval of 0 makes it one-shot.
    pub fn add_periodic_timer<F>(&mut self, expire: TimeStamp, interval: u64, f: F) -> TimerId
    where
        F: Fn() + 'static,
    {
        let callback = if interval == 0 {
            TimerCallback::Once(Box::new(f))
        } else {
            TimerCallback::Repeat(Rc::new(f))
        };
        self.insert(TimerEntry { expire, interval, callback })
    }

    /// Cancel a timer. Unknown or already-fired ids are ignored.
    pub fn remove_timer(&mut self, id: TimerId) {
        self.due.remove(&id);
        if let Some(entry) = self.entries.remove(&id) {
            self.queue.remove(&(entry.expire, id));
        }
    }

    /// True once `id` is no longer active (fired one-shot, removed, or
    /// never issued)
    pub fn expired(&self, id: TimerId) -> bool {
        !self.entries.contains_key(&id)
    }

    /// Take every timer with `expire <= now`, in (expire, id) order
    ///
    /// One-shot timers are retired. Periodic timers are rescheduled before
    /// this returns, so a callback may cancel its own timer.
    pub fn step(&mut self, now: TimeStamp) -> Vec<ExpiredTimer> {
        self.due.clear();
        let mut fired = Vec::new();

        while let Some(&(expire, id)) = self.queue.first() {
            if expire > now {
                break;
            }
            self.queue.pop_first();

            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };

            if entry.is_periodic() {
                let next = entry.next_expire_after(now);
                entry.expire = next;
                if let TimerCallback::Repeat(f) = &entry.callback {
                    fired.push(ExpiredTimer::repeat(id, expire, Rc::clone(f)));
                }
                self.queue.insert((next, id));
            } else if let Some(entry) = self.entries.remove(&id) {
                if let TimerCallback::Once(f) = entry.callback {
                    fired.push(ExpiredTimer::once(id, expire, f));
                }
            }
            self.due.insert(id);
        }

        fired
    }

    /// True if `id` came out of the latest `step` and has not been
    /// cancelled since. The reactor checks this before firing each timer
    /// so that a callback can cancel a later timer of the same batch.
    pub fn is_due(&self, id: TimerId) -> bool {
        self.due.contains(&id)
    }

    /// Earliest pending expiry
    pub fn next_expiry(&self) -> Option<TimeStamp> {
        self.queue.first().map(|&(expire, _)| expire)
    }

    /// Number of active timers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}
