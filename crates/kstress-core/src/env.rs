//! Environment variable utilities
//!
//! All runtime knobs are `KSTRESS_*` environment variables. These helpers
//! parse them with a fallback default; a value that fails to parse is
//! treated as unset.
//!
//! ```ignore
//! use kstress_core::env::{env_get, env_get_bool, env_get_duration};
//!
//! let instances: usize = env_get("KSTRESS_INSTANCES", 1);
//! let timeout = env_get_duration("KSTRESS_TIMEOUT", Duration::from_secs(10));
//! let perf = env_get_bool("KSTRESS_PERF", false);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// "1", "true", "yes", "on" (case-insensitive) are true, anything else
/// that is set is false. Unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as a duration
///
/// See `parse_duration` for the accepted syntax.
pub fn env_get_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_duration(&v))
        .unwrap_or(default)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

/// Parse a duration such as `90`, `90s`, `500ms`, `5m`, `2h` or `1d`
///
/// A bare number is seconds, matching how timeouts are usually given on
/// stress tool command lines.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    let secs = match unit.trim() {
        "" | "s" => value,
        "ms" => value / 1000.0,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86400.0,
        _ => return None,
    };
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs))
}

/// Parse a `w,z` seed pair
pub fn parse_seed(s: &str) -> Option<(u32, u32)> {
    let (w, z) = s.split_once(',')?;
    Some((w.trim().parse().ok()?, z.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__KSTRESS_UNSET_VAR__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__KSTRESS_UNSET_VAR__", true));
        assert!(!env_is_set("__KSTRESS_UNSET_VAR__"));
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__KSTRESS_TEST_NUM__", " 123 ");
        let val: usize = env_get("__KSTRESS_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__KSTRESS_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__KSTRESS_TEST_BAD__", "many");
        let val: usize = env_get("__KSTRESS_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__KSTRESS_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        for (raw, expect) in [("1", true), ("YES", true), ("on", true), ("0", false), ("garbage", false)] {
            std::env::set_var("__KSTRESS_TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__KSTRESS_TEST_BOOL__", !expect), expect, "value {}", raw);
        }
        std::env::remove_var("__KSTRESS_TEST_BOOL__");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("10y"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_env_get_duration() {
        std::env::set_var("__KSTRESS_TEST_DUR__", "3m");
        assert_eq!(
            env_get_duration("__KSTRESS_TEST_DUR__", Duration::from_secs(1)),
            Duration::from_secs(180)
        );
        std::env::remove_var("__KSTRESS_TEST_DUR__");
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed("1, 2"), Some((1, 2)));
        assert_eq!(parse_seed("1"), None);
        assert_eq!(parse_seed("a,2"), None);
    }
}
