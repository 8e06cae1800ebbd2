//! Stack memory for the shared coroutine stack
//!
//! A `StackRegion` is one anonymous mapping laid out as
//!
//! ```text
//!   low addr                                        high addr
//!   +-------------+--------------------------------------+
//!   | guard page  |        usable stack (grows down)     |
//!   | PROT_NONE   |        PROT_READ | PROT_WRITE        |
//!   +-------------+--------------------------------------+
//!   base          bottom()                           top()
//! ```
//!
//! Overflowing the usable area faults on the guard page instead of
//! silently corrupting the neighbouring mapping.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("costack stack memory requires a Unix platform");
    }
}

use costack_core::constants::GUARD_SIZE;

/// One guarded stack mapping
pub struct StackRegion {
    /// Start of the mapping (the guard page)
    base: *mut u8,

    /// Total mapping length including the guard page
    total_size: usize,
}

impl StackRegion {
    /// Lowest usable address
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: total_size always exceeds GUARD_SIZE
        unsafe { self.base.add(GUARD_SIZE) }
    }

    /// One past the highest usable address
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // SAFETY: stays within (one past the end of) the mapping
        unsafe { self.base.add(self.total_size) }
    }

    /// Usable bytes, excluding the guard page
    #[inline]
    pub fn usable_size(&self) -> usize {
        self.total_size - GUARD_SIZE
    }

    /// True if `addr` lies inside the usable area (top inclusive)
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom() as usize && addr <= self.top() as usize
    }
}

impl std::fmt::Debug for StackRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackRegion")
            .field("bottom", &self.bottom())
            .field("top", &self.top())
            .field("usable_size", &self.usable_size())
            .finish()
    }
}
