//! Command engine error model.

use thiserror::Error;

/// Result type used across the command engine.
pub type CommandResult<T> = Result<T, CommandError>;

/// Command engine error.
///
/// None of these are raised for expected runtime outcomes. They are handed to
/// the [`Reporter`](crate::Reporter), whose [`ErrorPolicy`](crate::ErrorPolicy)
/// decides whether the calling operation returns them or carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No command is registered under the requested name.
    #[error("command {0} not found")]
    NotFound(String),

    /// A lifecycle call was made on a command in the wrong state
    /// (double commit/cancel, terminating a command that is not current).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A command name was registered twice.
    #[error("command {0} is already registered")]
    DuplicateRegistration(String),

    /// A listener could not be attached to a signal.
    #[error("invalid listener: {0}")]
    InvalidListener(String),

    /// A message was sent while no command is running.
    #[error("no command is currently running")]
    NoActiveCommand,

    /// Undo or redo was requested with nothing on the corresponding stack.
    #[error("no commands to {0}")]
    EmptyHistory(&'static str),

    /// A command was started while another one is still active.
    #[error("command {requested} rejected: {active} is still running")]
    Busy { requested: String, active: String },

    /// A waiter was detached before the command it waited for terminated.
    #[error("stopped waiting for command {0}")]
    Interrupted(String),
}

impl CommandError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn duplicate(name: impl Into<String>) -> Self {
        Self::DuplicateRegistration(name.into())
    }

    pub fn invalid_listener(msg: impl Into<String>) -> Self {
        Self::InvalidListener(msg.into())
    }

    pub fn busy(requested: impl Into<String>, active: impl Into<String>) -> Self {
        Self::Busy {
            requested: requested.into(),
            active: active.into(),
        }
    }

    pub fn interrupted(name: impl Into<String>) -> Self {
        Self::Interrupted(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_command() {
        assert_eq!(
            CommandError::not_found("inc").to_string(),
            "command inc not found"
        );
        assert_eq!(
            CommandError::busy("b", "a").to_string(),
            "command b rejected: a is still running"
        );
        assert_eq!(CommandError::EmptyHistory("undo").to_string(), "no commands to undo");
    }
}
