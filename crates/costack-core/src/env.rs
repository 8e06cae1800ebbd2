//! Environment variable utilities
//!
//! All runtime knobs are read through these helpers so that an unset or
//! malformed variable silently falls back to the compiled-in default.
//!
//! ```ignore
//! use costack_core::env::{env_get, env_get_bool};
//!
//! let busy_ms: i32 = env_get("CST_BUSY_TIMEOUT_MS", 20);
//! let flush = env_get_bool("CST_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and well-formed
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean variable: "1", "true", "yes", "on" are true (case-insensitive).
/// Any other value is false; unset returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// True if `key` is set, whatever its value
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its variable names; tests run in parallel.

    #[test]
    fn test_unset_falls_back() {
        let key = "__CST_TEST_UNSET__";
        assert_eq!(env_get::<usize>(key, 42), 42);
        assert_eq!(env_get_opt::<usize>(key), None);
        assert!(env_get_bool(key, true));
        assert_eq!(env_get_str(key, "hello"), "hello");
        assert!(!env_is_set(key));
    }

    #[test]
    fn test_parse_set_value() {
        std::env::set_var("__CST_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<i32>("__CST_TEST_NUM__", 0), 123);
        assert!(env_is_set("__CST_TEST_NUM__"));
        std::env::remove_var("__CST_TEST_NUM__");
    }

    #[test]
    fn test_invalid_value_uses_default() {
        std::env::set_var("__CST_TEST_BAD__", "twenty");
        assert_eq!(env_get::<u64>("__CST_TEST_BAD__", 20), 20);
        std::env::remove_var("__CST_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__CST_TEST_BOOL__";
        for v in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, v);
            assert!(env_get_bool(key, false), "{v} should be true");
        }
        for v in ["0", "false", "garbage"] {
            std::env::set_var(key, v);
            assert!(!env_get_bool(key, true), "{v} should be false");
        }
        std::env::remove_var(key);
    }
}
