//! Stackful coroutines on a shared stack
//!
//! Every coroutine of a reactor runs on the same `SharedStack`. Only one of
//! them occupies it at a time; when a coroutine yields, the live part of
//! the stack (from its saved stack pointer up to the stack top) is copied
//! into a private buffer, and copied back to the same addresses right
//! before it is resumed.
//!
//! ```text
//!   shared stack                         private buffer of co#7
//!   +-------------------+  top()         +---------------+
//!   | frames of co#7    |  ---- yield --> | saved frames  |
//!   | ...               |  <-- resume --- |               |
//!   +-------------------+  sp            +---------------+
//!   |   (free)          |
//!   +-------------------+  bottom()
//! ```
//!
//! A suspended coroutine therefore costs memory proportional to the stack
//! depth it had when it yielded, not the full stack size.
//!
//! Frames are copied back to their original addresses, so pointers into a
//! coroutine's own stack stay valid across a yield. Pointers into another
//! coroutine's stack do not.

use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use costack_core::error::RuntimeResult;
use costack_core::{CoroutineId, CoroutineState};

use crate::arch::{self, SavedRegs};
use crate::memory::StackRegion;

/// The stack region coroutines of one reactor take turns on
pub struct SharedStack {
    region: StackRegion,

    /// Coroutine currently running on this stack
    current: Cell<CoroutineId>,
}

impl SharedStack {
    /// Map a new shared stack of at least `size` usable bytes
    pub fn new(size: usize) -> RuntimeResult<Rc<Self>> {
        Ok(Rc::new(Self {
            region: StackRegion::allocate(size)?,
            current: Cell::new(CoroutineId::NONE),
        }))
    }

    /// The coroutine running on this stack, if any
    #[inline]
    pub fn current(&self) -> Option<CoroutineId> {
        let id = self.current.get();
        if id.is_none() {
            None
        } else {
            Some(id)
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.region.usable_size()
    }

    #[inline]
    fn top(&self) -> *mut u8 {
        self.region.top()
    }
}

impl fmt::Debug for SharedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStack")
            .field("region", &self.region)
            .field("current", &self.current())
            .finish()
    }
}

type Entry = Box<dyn FnOnce(&Coroutine)>;

/// A resumable unit of execution
///
/// Created `Suspended`. `resume()` runs it until it calls `yield_now()` or
/// its entry function returns, after which it is `Dead`.
///
/// Dropping a coroutine that is suspended mid-function discards its saved
/// frames without running their destructors.
pub struct Coroutine {
    id: CoroutineId,
    stack: Rc<SharedStack>,
    state: Cell<CoroutineState>,
    started: Cell<bool>,

    /// Our own context while switched out
    regs: UnsafeCell<SavedRegs>,

    /// Where to return on yield or completion
    resumer: UnsafeCell<SavedRegs>,

    /// Live bytes of the shared stack at the last yield
    saved: RefCell<Vec<u8>>,

    entry: Cell<Option<Entry>>,
    panic: Cell<Option<Box<dyn Any + Send>>>,
}

impl Coroutine {
    /// Create a coroutine that will run `f` on `stack`
    pub fn new<F>(stack: &Rc<SharedStack>, f: F) -> Rc<Self>
    where
        F: FnOnce(&Coroutine) + 'static,
    {
        Rc::new(Self {
            id: CoroutineId::next(),
            stack: Rc::clone(stack),
            state: Cell::new(CoroutineState::Suspended),
            started: Cell::new(false),
            regs: UnsafeCell::new(SavedRegs::new()),
            resumer: UnsafeCell::new(SavedRegs::new()),
            saved: RefCell::new(Vec::new()),
            entry: Cell::new(Some(Box::new(f))),
            panic: Cell::new(None),
        })
    }

    #[inline]
    pub fn id(&self) -> CoroutineId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> CoroutineState {
        self.state.get()
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.state.get() == CoroutineState::Suspended
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state.get() == CoroutineState::Running
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state.get() == CoroutineState::Dead
    }

    /// Bytes of stack currently held in the private buffer
    pub fn saved_stack_len(&self) -> usize {
        self.saved.borrow().len()
    }

    /// Capacity of the private buffer
    pub fn saved_stack_capacity(&self) -> usize {
        self.saved.borrow().capacity()
    }

    /// Run the coroutine until it yields or finishes
    ///
    /// A panic escaping the entry function is re-raised here, after the
    /// coroutine has been marked dead.
    ///
    /// # Panics
    ///
    /// If the coroutine is not suspended, or if another coroutine is
    /// already running on the same shared stack.
    pub fn resume(self: &Rc<Self>) {
        let state = self.state.get();
        assert!(
            state == CoroutineState::Suspended,
            "resume called on {} coroutine {}",
            state,
            self.id
        );
        if let Some(running) = self.stack.current() {
            panic!(
                "recursive resume: {} resumed while {} runs on the same stack",
                self.id, running
            );
        }

        // Keep ourselves alive even if the body drops the last outside handle
        let _guard = Rc::clone(self);

        unsafe {
            if !self.started.replace(true) {
                arch::init_context(
                    self.regs.get(),
                    self.stack.top(),
                    coroutine_main,
                    Rc::as_ptr(self) as usize,
                );
            } else {
                self.restore_stack();
            }
        }

        self.stack.current.set(self.id);
        self.state.set(CoroutineState::Running);

        unsafe {
            arch::context_switch(self.resumer.get(), self.regs.get());
        }

        self.stack.current.set(CoroutineId::NONE);
        if self.state.get() == CoroutineState::Suspended {
            self.save_stack();
        }

        if let Some(payload) = self.panic.take() {
            panic::resume_unwind(payload);
        }
    }

    /// Suspend the running coroutine and return to whoever resumed it
    ///
    /// # Panics
    ///
    /// If called outside the coroutine's own execution.
    pub fn yield_now(&self) {
        assert!(
            self.state.get() == CoroutineState::Running && self.stack.current() == Some(self.id),
            "yield called on {} coroutine {} outside of its resume",
            self.state.get(),
            self.id
        );
        self.state.set(CoroutineState::Suspended);
        unsafe {
            arch::context_switch(self.regs.get(), self.resumer.get());
        }
    }

    /// Copy `[sp, top)` into the private buffer
    ///
    /// The buffer grows as needed and is only shrunk once the live region
    /// drops below half its capacity.
    fn save_stack(&self) {
        let top = self.stack.top() as usize;
        let sp = unsafe { (*self.regs.get()).stack_pointer() };
        debug_assert!(sp <= top && self.stack.region.contains(sp));
        let used = top - sp;

        let mut buf = self.saved.borrow_mut();
        buf.clear();
        if used < buf.capacity() / 2 {
            buf.shrink_to(used);
        }
        buf.reserve_exact(used);
        // SAFETY: [sp, top) lies inside the mapped stack and no coroutine
        // is running on it now
        let live = unsafe { std::slice::from_raw_parts(sp as *const u8, used) };
        buf.extend_from_slice(live);
    }

    /// Put the saved bytes back at the addresses they were copied from
    unsafe fn restore_stack(&self) {
        let buf = self.saved.borrow();
        let dst = self.stack.top().sub(buf.len());
        std::ptr::copy_nonoverlapping(buf.as_ptr(), dst, buf.len());
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("saved", &self.saved_stack_len())
            .finish()
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        debug_assert!(!self.is_running(), "coroutine {} dropped while running", self.id);
    }
}

/// First Rust frame on the shared stack
unsafe extern "C" fn coroutine_main(arg: usize) -> ! {
    let co = &*(arg as *const Coroutine);

    if let Some(entry) = co.entry.take() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry(co))) {
            co.panic.set(Some(payload));
        }
    }

    co.state.set(CoroutineState::Dead);
    arch::context_switch(co.regs.get(), co.resumer.get());

    // A dead coroutine is never switched back into
    std::process::abort()
}
