//! aarch64 context switching implementation
//!
//! AAPCS64: x19-x28, the frame pointer x29, the link register x30, sp and
//! the low halves of v8-v15 (d8-d15) are callee-saved.

use super::EntryFn;
use std::arch::naked_asm;

/// Saved callee-saved registers
///
/// Field offsets are hard-coded in `context_switch`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SavedRegs {
    pub sp: u64,       // 0x00
    pub lr: u64,       // 0x08
    pub x19_x28: [u64; 10], // 0x10..0x60
    pub fp: u64,       // 0x60
    pub d8_d15: [u64; 8],   // 0x68..0xa8
}

impl SavedRegs {
    pub const fn new() -> Self {
        Self {
            sp: 0,
            lr: 0,
            x19_x28: [0; 10],
            fp: 0,
            d8_d15: [0; 8],
        }
    }

    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }
}

/// Initialize a fresh context that calls `entry(arg)` from the trampoline
///
/// # Safety
///
/// `regs` must be valid for writes and `stack_top` must be the top of a
/// writable stack large enough for `entry`.
#[inline]
pub unsafe fn init_context(regs: *mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let regs = &mut *regs;
    *regs = SavedRegs::new();
    regs.sp = ((stack_top as usize) & !0xF) as u64;
    regs.lr = coroutine_trampoline as usize as u64;
    regs.x19_x28[0] = entry as usize as u64;
    regs.x19_x28[1] = arg as u64;
}

#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "mov x29, xzr",
        "blr x19",
        "brk #1",
    );
}

/// Save the current context into `old` and resume `new`
///
/// # Safety
///
/// `new` must hold a context produced by `init_context` or by a previous
/// `context_switch`, whose stack is intact.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (x0)
        "mov x9, sp",
        "str x9, [x0, #0x00]",
        "str x30, [x0, #0x08]",
        "stp x19, x20, [x0, #0x10]",
        "stp x21, x22, [x0, #0x20]",
        "stp x23, x24, [x0, #0x30]",
        "stp x25, x26, [x0, #0x40]",
        "stp x27, x28, [x0, #0x50]",
        "str x29, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // Load from new (x1)
        "ldr x9, [x1, #0x00]",
        "mov sp, x9",
        "ldr x30, [x1, #0x08]",
        "ldp x19, x20, [x1, #0x10]",
        "ldp x21, x22, [x1, #0x20]",
        "ldp x23, x24, [x1, #0x30]",
        "ldp x25, x26, [x1, #0x40]",
        "ldp x27, x28, [x1, #0x50]",
        "ldr x29, [x1, #0x60]",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
