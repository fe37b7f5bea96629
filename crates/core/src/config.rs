//! Manager configuration (defaults + environment overrides).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::DEFAULT_STACK_LIMIT;
use crate::log::LogLevel;
use crate::report::ErrorPolicy;

pub const ENV_STACK_LIMIT: &str = "RETRACE_STACK_LIMIT";
pub const ENV_LOG_LEVEL: &str = "RETRACE_LOG_LEVEL";
pub const ENV_SILENT_ERRORS: &str = "RETRACE_SILENT_ERRORS";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings a `CommandManager` is built from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Capacity of each of the undo and redo stacks.
    pub stack_limit: usize,
    /// Initial transaction log filter.
    pub log_level: LogLevel,
    /// Whether reported errors abort the reporting call.
    pub error_policy: ErrorPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stack_limit: DEFAULT_STACK_LIMIT,
            log_level: LogLevel::default(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Read overrides from the process environment.
    ///
    /// Unset keys keep their default. Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        for result in config.apply(lookup) {
            if let Err(err) = result {
                tracing::warn!("{err}; using default");
            }
        }
        config
    }

    /// Strict variant: the first malformed value is an error.
    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for result in config.apply(lookup) {
            result?;
        }
        Ok(config)
    }

    fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<Result<(), ConfigError>> {
        let mut results = Vec::new();

        if let Some(raw) = lookup(ENV_STACK_LIMIT) {
            results.push(
                raw.trim()
                    .parse::<usize>()
                    .map(|limit| self.stack_limit = limit)
                    .map_err(|e| invalid(ENV_STACK_LIMIT, &raw, e.to_string())),
            );
        }

        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            results.push(
                raw.parse::<LogLevel>()
                    .map(|level| self.log_level = level)
                    .map_err(|e| invalid(ENV_LOG_LEVEL, &raw, e)),
            );
        }

        if let Some(raw) = lookup(ENV_SILENT_ERRORS) {
            let policy = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(ErrorPolicy::Silent),
                "0" | "false" | "no" => Ok(ErrorPolicy::Raise),
                _ => Err(invalid(ENV_SILENT_ERRORS, &raw, "expected a boolean".into())),
            };
            results.push(policy.map(|p| self.error_policy = p));
        }

        results
    }
}

fn invalid(key: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason,
    }
}
