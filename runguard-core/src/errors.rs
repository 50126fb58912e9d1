// runguard-core/src/errors.rs
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, RunError>;

/// Errors that can occur while reconciling a command resource.
#[derive(Error, Debug)]
pub enum RunError {
    /// The execution environment is missing; the host should skip the resource.
    #[error("Execution environment unavailable: {reason}")]
    Unavailable { reason: String },

    /// The primary or reload command exited with a non-zero status.
    #[error("Failed to execute command: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A probe or command ran longer than its bound and was killed.
    #[error("Command '{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The desired-state description is not valid.
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// A command line could not be split into an argument vector.
    #[error("Invalid command line: '{command_line}'")]
    InvalidCommandLine { command_line: String },

    /// The child process could not be started at all.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A TOML document could not be parsed.
    #[error("Configuration Error: {0}")]
    Config(#[source] anyhow::Error),
}

impl RunError {
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        RunError::InvalidSpec(msg.into())
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        RunError::Unavailable {
            reason: reason.into(),
        }
    }

    /// The stderr captured from a failed command, if this error carries one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            RunError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_reports_stderr() {
        let err = RunError::CommandFailed {
            command: "false".to_string(),
            status: 2,
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to execute command: boom");
        assert_eq!(err.stderr(), Some("boom"));
    }

    #[test]
    fn test_timeout_display_names_command() {
        let err = RunError::Timeout {
            command: "sleep 10".to_string(),
            timeout: Duration::from_millis(200),
        };
        let msg = err.to_string();
        assert!(msg.contains("sleep 10"), "Unexpected message: {}", msg);
        assert!(err.stderr().is_none());
    }
}
