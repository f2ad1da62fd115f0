//! Coordinator configuration.
//!
//! Read from environment variables, each optional:
//! - `FABRIC_ORDERING`: `global` or `subspace` (default: `global`)
//! - `FABRIC_ABORT_RETRY`: `stop` or `keep` (default: `stop`)
//! - `FABRIC_WAIT_TIMEOUT_MS`: bound on each dependency wait (default: none)
//! - `FABRIC_SESSION_IDLE_SECS`: idle time before a session may be swept
//!   (default: 300)

use std::time::Duration;

use fabric_core::{AbortRetryPolicy, OrderingScope};

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Configuration for a [`crate::Coordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Which operations a new one is ordered against.
    pub ordering: OrderingScope,
    /// How a waiting operation treats `AbortRetry`.
    pub abort_retry: AbortRetryPolicy,
    /// Bound on waiting for dependencies. `None` waits indefinitely.
    pub wait_timeout: Option<Duration>,
    /// Sessions idle this long are closed by `sweep_inactive`.
    pub session_idle_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            ordering: OrderingScope::Global,
            abort_retry: AbortRetryPolicy::StopWaiting,
            wait_timeout: None,
            session_idle_timeout: Duration::from_secs(300),
        }
    }
}

impl CoordinatorConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads each variable through `lookup`; unset ones keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = CoordinatorConfig::default();

        if let Some(value) = lookup("FABRIC_ORDERING") {
            config.ordering = value
                .parse()
                .map_err(|reason| invalid("FABRIC_ORDERING", &value, reason))?;
        }
        if let Some(value) = lookup("FABRIC_ABORT_RETRY") {
            config.abort_retry = value
                .parse()
                .map_err(|reason| invalid("FABRIC_ABORT_RETRY", &value, reason))?;
        }
        if let Some(value) = lookup("FABRIC_WAIT_TIMEOUT_MS") {
            let ms: u64 = value.parse().map_err(|e: std::num::ParseIntError| {
                invalid("FABRIC_WAIT_TIMEOUT_MS", &value, e.to_string())
            })?;
            config.wait_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(value) = lookup("FABRIC_SESSION_IDLE_SECS") {
            let secs: u64 = value.parse().map_err(|e: std::num::ParseIntError| {
                invalid("FABRIC_SESSION_IDLE_SECS", &value, e.to_string())
            })?;
            config.session_idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason,
    }
}
