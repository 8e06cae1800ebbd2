//! Unix signal installation via sigaction

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use costack_core::error::{RuntimeError, RuntimeResult};

use super::signal_bit;

static PENDING: AtomicU64 = AtomicU64::new(0);
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_signal(signo: libc::c_int) {
    PENDING.fetch_or(signal_bit(signo), Ordering::SeqCst);

    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        // write(2) is async-signal-safe; errno must survive the handler
        unsafe {
            let saved = *libc::__errno_location();
            let one: u64 = 1;
            libc::write(fd, &one as *const u64 as *const libc::c_void, 8);
            *libc::__errno_location() = saved;
        }
    }
}

/// Route `sig` into the pending mask and wake `wake_fd` on delivery
pub(crate) fn install(sig: Signal, wake_fd: RawFd) -> RuntimeResult<()> {
    WAKE_FD.store(wake_fd, Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(sig, &action) }.map_err(|e| RuntimeError::Os(e as i32))?;
    Ok(())
}

/// Put `signo` back to its default disposition
pub(crate) fn restore_default(signo: i32) {
    if let Ok(sig) = Signal::try_from(signo) {
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let _ = unsafe { sigaction(sig, &action) };
    }
}

/// Forget `wake_fd` if it is still the registered one
pub(crate) fn clear_wake_fd(wake_fd: RawFd) {
    let _ = WAKE_FD.compare_exchange(wake_fd, -1, Ordering::SeqCst, Ordering::SeqCst);
}

/// Take the pending signals selected by `mask`, leaving the others
pub(crate) fn take_pending(mask: u64) -> u64 {
    if mask == 0 {
        return 0;
    }
    PENDING.fetch_and(!mask, Ordering::SeqCst) & mask
}
