use thiserror::Error;

use crate::connection::ConnectionState;
use crate::terminal::TerminalId;
use crate::workspace::TabId;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Backend is not connected")]
    Disconnected,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unreadable: {0}")]
    Unreadable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Unknown tab: {0}")]
    UnknownTab(TabId),

    #[error("Unknown terminal: {0}")]
    UnknownTerminal(TerminalId),

    #[error("Invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl AppError {
    /// Whether the caller may sanely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(AppError::Transient("write failed".into()).is_retryable());
        assert!(!AppError::Disconnected.is_retryable());
        assert!(!AppError::Conflict("/a".into()).is_retryable());
        assert!(!AppError::Fatal("pty gone".into()).is_retryable());
    }

    #[test]
    fn io_errors_convert_and_are_not_retried() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, AppError::IOError(_)));
        assert!(!err.is_retryable());
        assert_eq!(
            AppError::ValidationError("empty path".into()).to_string(),
            "Validation error: empty path"
        );
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = AppError::InvalidTransition {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connecting,
        };
        assert_eq!(
            err.to_string(),
            "Invalid connection transition from connecting to connecting"
        );
    }
}
