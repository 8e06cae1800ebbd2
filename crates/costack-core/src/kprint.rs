//! Kernel-style print macros for costack
//!
//! Leveled output to a locked stderr, similar to the Linux kernel's printk.
//! Everything the reactor reports (channel warnings, signal setup failures,
//! connect outcomes) goes through these macros.
//!
//! # Environment Variables
//!
//! - `CST_FLUSH_EPRINT=1` - Flush stderr after each print (useful when a
//!   coroutine crashes the process)
//! - `CST_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace or 0..=5
//!
//! # Usage
//!
//! ```ignore
//! use costack_core::{kdebug, kwarn};
//!
//! kdebug!("connection {} established", id);
//! kwarn!("fd {} hung up without an error callback", fd);
//! ```

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::env::{env_get_bool, env_get_opt};

/// Log levels, most severe first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    const ALL: [LogLevel; 6] = [
        LogLevel::Off,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Numeric level; anything above 5 saturates to `Trace`
    pub fn from_u8(v: u8) -> Self {
        Self::ALL[usize::from(v.min(5))]
    }

    /// Fixed-width tag that starts every leveled record
    pub fn prefix(&self) -> &'static str {
        const TAGS: [&str; 6] = ["", "[ERROR]", "[WARN] ", "[INFO] ", "[DEBUG]", "[TRACE]"];
        TAGS[*self as usize]
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(LogLevel::Off),
            "error" | "1" => Ok(LogLevel::Error),
            "warn" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize logging from environment variables
///
/// Runs lazily on the first log call. Calling it explicitly makes start-up
/// deterministic; later calls are no-ops, and programmatic setters win
/// over the environment once they have been used.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    FLUSH_ENABLED.store(env_get_bool("CST_FLUSH_EPRINT", false), Ordering::Relaxed);

    if let Some(level) = env_get_opt::<LogLevel>("CST_LOG_LEVEL") {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

/// Current log level
#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the level; wins over `CST_LOG_LEVEL` from then on
pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// Write one record under a single stderr lock
fn emit(tag: Option<LogLevel>, args: fmt::Arguments<'_>, newline: bool) {
    let mut out = std::io::stderr().lock();
    if let Some(level) = tag {
        let _ = write!(out, "{} ", level.prefix());
    }
    let _ = out.write_fmt(args);
    if newline {
        let _ = out.write_all(b"\n");
    }
    if flush_enabled() {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprint_impl(args: fmt::Arguments<'_>, newline: bool) {
    emit(None, args, newline);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(Some(level), args, true);
    }
}

/// Unleveled stderr output, no newline
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), false)
    };
}

/// Unleveled stderr output with newline
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint::_kprint_impl(format_args!(""), true)
    };
    ($($arg:tt)*) => {
        $crate::kprint::_kprint_impl(format_args!($($arg)*), true)
    };
}

/// Record at an explicit level: `klog!(Warn, "fd {} gone", fd)`
#[macro_export]
macro_rules! klog {
    ($level:ident, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($crate::kprint::LogLevel::$level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!(Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!(Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!(Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!(Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!(Trace, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!(" WARN ".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("0".parse::<LogLevel>(), Ok(LogLevel::Off));
        assert_eq!("5".parse::<LogLevel>(), Ok(LogLevel::Trace));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_display_roundtrip() {
        for v in 0..=5u8 {
            let level = LogLevel::from_u8(v);
            assert_eq!(level.to_string().parse::<LogLevel>(), Ok(level));
        }
    }

    #[test]
    fn test_macros_compile() {
        set_log_level(LogLevel::Off);
        assert!(!level_enabled(LogLevel::Error));

        kprint!("test");
        kprintln!("test {}", 42);
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kdebug!("debug");
        ktrace!("trace");
        klog!(Warn, "explicit {}", 1);
    }
}
