//! Unix stack mapping using mmap

use super::StackRegion;
use costack_core::constants::{GUARD_SIZE, MIN_STACK_SIZE};
use costack_core::error::{MemoryError, RuntimeResult};

impl StackRegion {
    /// Map a stack with `usable_size` bytes (rounded up to whole pages)
    /// plus one guard page below it.
    pub fn allocate(usable_size: usize) -> RuntimeResult<Self> {
        if usable_size < MIN_STACK_SIZE {
            return Err(MemoryError::InvalidSize(usable_size).into());
        }

        let usable = usable_size
            .checked_add(GUARD_SIZE - 1)
            .map(|n| n & !(GUARD_SIZE - 1))
            .ok_or(MemoryError::InvalidSize(usable_size))?;
        let total_size = usable
            .checked_add(GUARD_SIZE)
            .ok_or(MemoryError::InvalidSize(usable_size))?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        // Guard page at the low end; stacks grow down into it
        let ret = unsafe { libc::mprotect(base, GUARD_SIZE, libc::PROT_NONE) };
        if ret != 0 {
            unsafe { libc::munmap(base, total_size) };
            return Err(MemoryError::ProtectionFailed.into());
        }

        Ok(StackRegion {
            base: base as *mut u8,
            total_size,
        })
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total_size);
        }
    }
}
