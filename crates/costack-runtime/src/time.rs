//! Monotonic millisecond clock used by timers and the reactor

use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds since a process-wide monotonic epoch
pub type TimeStamp = u64;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current time on the monotonic clock
#[inline]
pub fn now() -> TimeStamp {
    epoch().elapsed().as_millis() as TimeStamp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let a = now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now();
        assert!(b >= a + 5);
    }
}
