//! Cross-thread access to a reactor
//!
//! The `EventLoop` itself is confined to its thread. A `LoopHandle` is the
//! one `Send + Sync` door into it: closures pushed through the handle land
//! in a lock-free queue, and an eventfd registered with the loop wakes the
//! poll so they run promptly.
//!
//! ```text
//!   other thread                     reactor thread
//!   handle.queue_in_loop(f) ──push──► SegQueue ──drain after deferred──► f()
//!                           ──write─► eventfd ──EPOLLIN──► wakeup channel
//! ```

use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use nix::errno::Errno;

use costack_core::error::{RuntimeError, RuntimeResult};

use crate::channel::Channel;

type RemoteFunctor = Box<dyn FnOnce() + Send>;

pub(crate) struct RemoteShared {
    queue: SegQueue<RemoteFunctor>,
    quit: AtomicBool,
    wake_fd: RawFd,
}

impl RemoteShared {
    pub(crate) fn new() -> RuntimeResult<Arc<Self>> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(RuntimeError::Os(Errno::last() as i32));
        }
        Ok(Arc::new(Self {
            queue: SegQueue::new(),
            quit: AtomicBool::new(false),
            wake_fd: fd,
        }))
    }

    #[inline]
    pub(crate) fn wake_fd(&self) -> RawFd {
        self.wake_fd
    }

    fn wakeup(&self) {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.wake_fd,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN: counter saturated, a wakeup is already pending
        debug_assert!(ret == 8 || Errno::last() == Errno::EAGAIN);
    }

    /// Reset the eventfd counter
    pub(crate) fn drain_wakeups(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.wake_fd,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// Run the closures queued so far. Closures queued while draining
    /// wait for the next iteration.
    pub(crate) fn run_queued(&self) {
        for _ in 0..self.queue.len() {
            match self.queue.pop() {
                Some(f) => f(),
                None => break,
            }
        }
    }

    /// Consume a pending quit request
    pub(crate) fn take_quit(&self) -> bool {
        self.quit.swap(false, Ordering::AcqRel)
    }
}

impl Drop for RemoteShared {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
        }
    }
}

/// Loop-side half: the wakeup channel plus the shared queue
pub(crate) struct Remote {
    pub(crate) shared: Arc<RemoteShared>,
    pub(crate) channel: Rc<Channel>,
}

/// Thread-safe handle to an `EventLoop`
///
/// Cheap to clone. Closures and quit requests sent after the loop is gone
/// are silently dropped.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<RemoteShared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Arc<RemoteShared>) -> Self {
        Self { shared }
    }

    /// Run `f` on the reactor thread during a later iteration
    pub fn queue_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.push(Box::new(f));
        self.shared.wakeup();
    }

    /// Ask the loop to stop after its current iteration
    pub fn quit(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.wakeup();
    }

    /// Interrupt the loop's poll without queueing anything
    pub fn wakeup(&self) {
        self.shared.wakeup();
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("wake_fd", &self.shared.wake_fd)
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}
