//! Error types for the command system.
//!
//! Resolution misses are not errors: [`crate::resolve`] returns `None` for
//! text that is not a command. Everything else a caller can observe is a
//! [`CommandError`].

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::sandbox::HandlerError;

/// Placeholder replaced with the live command prefix in user-facing messages.
pub const PREFIX_PLACEHOLDER: &str = "!#prefix#!";

/// Result type alias for command operations.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors that can occur when managing or dispatching commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Lookup by explicit path failed.
    #[error("'{0}' is not a registered command.")]
    NotFound(String),

    /// A sibling with the same name already exists.
    #[error("A command named '{name}' already exists under {parent}")]
    DuplicateName { parent: String, name: String },

    /// The existing sibling is protected from replacement.
    #[error("Command '{0}' is not overridable")]
    Conflict(String),

    /// add-command could not determine a name from the source or overrides.
    #[error("Command source does not declare a name")]
    MissingName,

    /// The resolved command is disabled.
    #[error("'{0}' is disabled, enable to execute.")]
    Disabled(String),

    /// The resolved command has no loaded handler.
    #[error("'{0}' has no handler to execute")]
    NoHandler(String),

    /// The caller's level is below the command's threshold.
    #[error(
        "Caller did not have the required permissions ({caller}/{required}) to use the '{command}' command."
    )]
    InsufficientPermission {
        command: String,
        caller: i64,
        required: i64,
    },

    /// The sandbox refused to load a handler source.
    #[error("Failed to load handler for '{command}': {message}")]
    HandlerLoad { command: String, message: String },

    /// The handler failed in a way it did not signal itself (panic, sandbox fault).
    #[error("'{command}' failed unexpectedly: {message}")]
    HandlerExecution { command: String, message: String },

    /// An error raised by the handler, passed through unmodified.
    #[error("{source}")]
    Handler {
        command: String,
        source: HandlerError,
    },

    /// Fetching remote command source failed.
    #[error("Failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },

    /// Reading or writing persisted state failed.
    #[error("Persistence error at {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    /// Metadata violates a structural rule.
    #[error("Invalid command metadata: {0}")]
    Validation(String),
}

impl CommandError {
    /// Create a persistence error for a file path.
    pub fn persistence(path: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Create a fetch error.
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a handler load error.
    pub fn handler_load(command: impl Into<String>, message: impl ToString) -> Self {
        Self::HandlerLoad {
            command: command.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if dispatch was refused by policy before the handler ran.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            CommandError::Disabled(_)
                | CommandError::NoHandler(_)
                | CommandError::InsufficientPermission { .. }
        )
    }

    /// Returns the name of the command this error concerns, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            CommandError::NotFound(name)
            | CommandError::Conflict(name)
            | CommandError::Disabled(name)
            | CommandError::NoHandler(name) => Some(name),
            CommandError::DuplicateName { name, .. } => Some(name),
            CommandError::InsufficientPermission { command, .. }
            | CommandError::HandlerLoad { command, .. }
            | CommandError::HandlerExecution { command, .. }
            | CommandError::Handler { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Returns the message to show the caller, with the prefix placeholder filled in.
    pub fn user_message(&self, prefix: &str) -> String {
        self.to_string().replace(PREFIX_PLACEHOLDER, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::Disabled("test".to_string());
        assert_eq!(err.to_string(), "'test' is disabled, enable to execute.");

        let err = CommandError::InsufficientPermission {
            command: "test".to_string(),
            caller: 0,
            required: 500,
        };
        assert!(err.to_string().contains("(0/500)"));
    }

    #[test]
    fn test_policy_rejection() {
        assert!(CommandError::Disabled("x".to_string()).is_policy_rejection());
        assert!(CommandError::NoHandler("x".to_string()).is_policy_rejection());
        assert!(!CommandError::MissingName.is_policy_rejection());
        assert!(!CommandError::persistence("/tmp/x", "boom").is_policy_rejection());
    }

    #[test]
    fn test_user_message_fills_prefix() {
        let err = CommandError::Handler {
            command: "roll".to_string(),
            source: HandlerError::ImproperUsage(Some(format!(
                "Try {PREFIX_PLACEHOLDER}help roll"
            ))),
        };
        assert_eq!(err.user_message("!"), "Try !help roll");
        assert_eq!(err.command(), Some("roll"));
    }
}
