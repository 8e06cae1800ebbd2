//! x86_64 context switching implementation
//!
//! System V AMD64: rbx, rbp, r12-r15, rsp, the MXCSR control bits and the
//! x87 control word are callee-saved.

use super::EntryFn;
use std::arch::naked_asm;

/// Saved callee-saved registers
///
/// Field offsets are hard-coded in `context_switch`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SavedRegs {
    pub rsp: u64,    // 0x00
    pub rip: u64,    // 0x08
    pub rbx: u64,    // 0x10
    pub rbp: u64,    // 0x18
    pub r12: u64,    // 0x20
    pub r13: u64,    // 0x28
    pub r14: u64,    // 0x30
    pub r15: u64,    // 0x38
    pub mxcsr: u32,  // 0x40
    pub fpucw: u16,  // 0x44
    _pad: u16,
}

impl SavedRegs {
    pub const fn new() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: 0x1F80,
            fpucw: 0x037F,
            _pad: 0,
        }
    }

    /// Stack pointer captured at the last switch away from this context
    #[inline]
    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }
}

impl Default for SavedRegs {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize a fresh context
///
/// When first switched to, the context starts in the trampoline on a
/// 16-byte aligned `stack_top` and calls `entry(arg)`.
///
/// # Safety
///
/// `regs` must be valid for writes and `stack_top` must be the top of a
/// writable stack large enough for `entry`.
#[inline]
pub unsafe fn init_context(regs: *mut SavedRegs, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    // The trampoline is entered by `jmp`, so rsp is 16-aligned on entry and
    // its `call` leaves the callee with the ABI-mandated rsp+8 alignment.
    let sp = (stack_top as usize) & !0xF;

    let regs = &mut *regs;
    *regs = SavedRegs::new();
    regs.rsp = sp as u64;
    regs.rip = coroutine_trampoline as usize as u64;
    regs.r12 = entry as usize as u64;
    regs.r13 = arg as u64;
}

/// First frame of every fresh context
#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry functions never return
        "ud2",
    );
}

/// Save the current context into `old` and resume `new`
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// `new` must hold a context produced by `init_context` or by a previous
/// `context_switch`, whose stack is intact.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (RDI)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        // Load from new (RSI)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr [rsi + 0x40]",
        "fldcw [rsi + 0x44]",
        "jmp rax",
        // Resumed here; return address is on top of the restored stack
        "1:",
        "ret",
    );
}
