//! Diagnostic sink the engine reports warnings and errors through.
//!
//! The engine never decides on its own whether a programmer error (unknown
//! command, double commit, ...) should abort the caller. It hands the error to
//! a [`Reporter`] and propagates whatever the reporter returns.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CommandError, CommandResult};

/// What a reporter does with an error after recording it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Hand the error back so the reporting operation returns it.
    #[default]
    Raise,
    /// Record it and let the operation return its neutral value.
    Silent,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" => Ok(ErrorPolicy::Raise),
            "silent" => Ok(ErrorPolicy::Silent),
            other => Err(format!("unknown error policy: {other}")),
        }
    }
}

/// Logging sink consumed by the engine.
pub trait Reporter {
    /// Informational, debug granularity.
    fn log(&self, scope: &str, message: &str);

    fn warn(&self, scope: &str, message: &str);

    /// Record `err`; `Err` means the caller must abort with it.
    fn error(&self, scope: &str, err: CommandError) -> CommandResult<()>;
}

/// [`Reporter`] backed by `tracing` events.
#[derive(Debug, Copy, Clone, Default)]
pub struct TracingReporter {
    policy: ErrorPolicy,
}

impl TracingReporter {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    pub fn silent() -> Self {
        Self::new(ErrorPolicy::Silent)
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }
}

impl Reporter for TracingReporter {
    fn log(&self, scope: &str, message: &str) {
        tracing::debug!(scope, "{message}");
    }

    fn warn(&self, scope: &str, message: &str) {
        tracing::warn!(scope, "{message}");
    }

    fn error(&self, scope: &str, err: CommandError) -> CommandResult<()> {
        tracing::error!(scope, "{err}");
        match self.policy {
            ErrorPolicy::Raise => Err(err),
            ErrorPolicy::Silent => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_policy_returns_the_error() {
        let reporter = TracingReporter::default();
        let err = CommandError::not_found("x");
        assert_eq!(reporter.error("test", err.clone()), Err(err));
    }

    #[test]
    fn silent_policy_swallows_the_error() {
        let reporter = TracingReporter::silent();
        assert_eq!(reporter.error("test", CommandError::NoActiveCommand), Ok(()));
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("SILENT".parse::<ErrorPolicy>(), Ok(ErrorPolicy::Silent));
        assert!("panic".parse::<ErrorPolicy>().is_err());
    }
}
