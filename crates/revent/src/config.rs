//! Reactor configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Environment Variables
//!
//! - `REVENT_BACKEND` - force a poller backend: epoll | kqueue | select
//! - `REVENT_IDLE_TIMEOUT_MS` - poll timeout with no timers pending;
//!   negative means block indefinitely (the default)
//! - `REVENT_MAX_EVENTS` - readiness batch capacity per poll
//!
//! # Example
//!
//! ```rust,ignore
//! use revent::ReactorConfig;
//! use std::time::Duration;
//!
//! // Defaults with env overrides
//! let config = ReactorConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ReactorConfig::from_env()
//!     .idle_timeout(Some(Duration::from_secs(30)))
//!     .max_events(256);
//! ```

use std::time::Duration;

use revent_core::env_get;
use revent_core::rwarn;

use crate::poller::PollerType;

/// Reactor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Poller backend to construct (native queue probed, select fallback)
    pub backend: PollerType,
    /// Poll timeout with no timers pending; `None` blocks indefinitely
    pub idle_timeout: Option<Duration>,
    /// Readiness batch capacity per poll
    pub max_events: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            backend: PollerType::native(),
            idle_timeout: None,
            max_events: 1024,
        }
    }
}

impl ReactorConfig {
    /// Start from library defaults and apply environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let backend: String = env_get("REVENT_BACKEND", String::new());
        match backend.to_lowercase().as_str() {
            "" => {}
            "epoll" => config.backend = PollerType::Epoll,
            "kqueue" => config.backend = PollerType::Kqueue,
            "select" => config.backend = PollerType::Select,
            other => rwarn!(
                "unknown REVENT_BACKEND '{}', keeping {}",
                other,
                config.backend.name()
            ),
        }

        let idle_ms: i64 = env_get("REVENT_IDLE_TIMEOUT_MS", -1);
        if idle_ms >= 0 {
            config.idle_timeout = Some(Duration::from_millis(idle_ms as u64));
        }

        config.max_events = env_get("REVENT_MAX_EVENTS", config.max_events).max(1);

        config
    }

    pub fn backend(mut self, backend: PollerType) -> Self {
        self.backend = backend;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReactorConfig::default();
        assert_eq!(config.backend, PollerType::native());
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.max_events, 1024);
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::default()
            .backend(PollerType::Select)
            .idle_timeout(Some(Duration::from_millis(250)))
            .max_events(0);
        assert_eq!(config.backend, PollerType::Select);
        assert_eq!(config.idle_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_events, 1); // clamped to something usable
    }
}
