//! POSIX signal trapping for the reactor
//!
//! Signal dispositions are process-wide. The handler only records the
//! signal in a pending mask and pokes the trapping loop's wakeup fd; the
//! user callback runs later on the reactor thread, right after the poll.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub(crate) use unix::*;
    }
}

pub use nix::sys::signal::Signal;

/// Bit for `signo` in a pending or trapped mask
#[inline]
pub(crate) fn signal_bit(signo: i32) -> u64 {
    if (1..64).contains(&signo) {
        1u64 << signo
    } else {
        0
    }
}
