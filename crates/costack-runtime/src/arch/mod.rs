//! Architecture-specific context switching
//!
//! Each backend exposes the same three items:
//!
//! - `SavedRegs` - callee-saved register file for a suspended context
//! - `init_context` - prepare a fresh context that calls `entry(arg)`
//! - `context_switch` - save the current context, load another
//!
//! Only callee-saved state is swapped. Everything else is dead across the
//! call to `context_switch` by the platform ABI.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        pub mod x86_64;
        pub use self::x86_64::{SavedRegs, init_context, context_switch};
    } else if #[cfg(target_arch = "aarch64")] {
        pub mod aarch64;
        pub use self::aarch64::{SavedRegs, init_context, context_switch};
    } else {
        compile_error!("costack supports only x86_64 and aarch64");
    }
}

/// Entry point signature for a fresh context. Never returns.
pub type EntryFn = unsafe extern "C" fn(usize) -> !;
