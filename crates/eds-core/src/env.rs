//! Environment variable helpers
//!
//! Typed lookups with defaults, used by the `from_env()` configuration
//! constructors.
//!
//! # Usage
//!
//! ```ignore
//! use eds_core::env::{env_get, env_get_bool, env_get_ms};
//!
//! let nprocs: usize = env_get("EDS_NPROCS", 1);
//! let tick = env_get_ms("EDS_TICK_SLICE_MS", 1000);
//! let verbose = env_get_bool("EDS_VERBOSE", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`; unset or unparsable values yield `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` if `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean lookup. "1", "true", "yes" and "on" (any case) are true, anything
/// else that is set is false.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Millisecond duration lookup.
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}
