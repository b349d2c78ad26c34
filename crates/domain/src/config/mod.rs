mod bridge;
mod notifier;
mod observability;
mod queue;
mod sessions;

pub use bridge::*;
pub use notifier::*;
pub use observability::*;
pub use queue::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Environment variable that overrides `sessions.capacity`.
pub const CAPACITY_ENV: &str = "MAX_ACTIVE_CLIENTS";

impl Config {
    /// Apply environment overrides on top of the file values.
    ///
    /// Unparseable or zero values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(CAPACITY_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.sessions.capacity = n,
                _ => tracing::warn!(value = %raw, "ignoring invalid {CAPACITY_ENV}"),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.sessions.capacity == 0 {
            error("sessions.capacity", "capacity must be greater than 0");
        }
        if self.sessions.staleness_secs == 0 {
            error("sessions.staleness_secs", "staleness window must be greater than 0");
        }
        if self.sessions.sweep_interval_secs == 0 {
            error("sessions.sweep_interval_secs", "sweep interval must be greater than 0");
        }
        if self.sessions.pairing_timeout_secs == 0 {
            error("sessions.pairing_timeout_secs", "pairing timeout must be greater than 0");
        }
        if self.sessions.dir_prefix.contains(['/', '\\']) {
            error("sessions.dir_prefix", "prefix must not contain path separators");
        }
        if self.queue.max_concurrent_per_owner == 0 {
            error("queue.max_concurrent_per_owner", "must be greater than 0");
        }
        if self.notifier.enabled && self.notifier.base_url.is_empty() {
            error("notifier.base_url", "base_url must not be empty when the notifier is enabled");
        }

        // Sweeping less often than the staleness window lets idle sessions
        // linger for up to twice as long.
        if self.sessions.sweep_interval_secs > self.sessions.staleness_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "sessions.sweep_interval_secs".into(),
                message: "sweep interval is longer than the staleness window".into(),
            });
        }

        if self.bridge.command.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bridge.command".into(),
                message: "no bridge command configured; sessions cannot be created".into(),
            });
        }

        if self.notifier.enabled && std::env::var(&self.notifier.secret_env).is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "notifier.secret_env".into(),
                message: format!("{} is not set; notifications are sent without a secret", self.notifier.secret_env),
            });
        }

        errors
    }
}
