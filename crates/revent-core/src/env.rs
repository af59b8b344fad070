//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Works with any type that implements `FromStr`. Unset or unparseable
/// values fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else (including unset) returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let v: usize = env_get("REVENT_TEST_UNSET_VAR", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("REVENT_TEST_PARSE_VAR", "17");
        let v: i64 = env_get("REVENT_TEST_PARSE_VAR", 0);
        assert_eq!(v, 17);
        std::env::remove_var("REVENT_TEST_PARSE_VAR");
    }

    #[test]
    fn test_env_get_bool() {
        assert!(!env_get_bool("REVENT_TEST_UNSET_BOOL", false));
        std::env::set_var("REVENT_TEST_BOOL_VAR", "yes");
        assert!(env_get_bool("REVENT_TEST_BOOL_VAR", false));
        std::env::set_var("REVENT_TEST_BOOL_VAR", "nope");
        assert!(!env_get_bool("REVENT_TEST_BOOL_VAR", true));
        std::env::remove_var("REVENT_TEST_BOOL_VAR");
    }
}
