//! Error types for sessiond
//!
//! Provides a unified error type used across all sessiond crates.

use std::path::PathBuf;

/// Main error type for sessiond operations
#[derive(Debug, thiserror::Error)]
pub enum SessiondError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // === State Errors ===

    #[error("Bad state: {0}")]
    BadState(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Bad value: {0}")]
    BadValue(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Session File Errors ===

    #[error("Session file error in {path}: {message}")]
    SessionFile { path: PathBuf, message: String },

    // === Process Errors ===

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessiondError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a bad-state error
    pub fn bad_state(msg: impl Into<String>) -> Self {
        Self::BadState(msg.into())
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a bad-value error
    pub fn bad_value(msg: impl Into<String>) -> Self {
        Self::BadValue(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a process-spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::ProcessSpawn(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using SessiondError
pub type Result<T> = std::result::Result<T, SessiondError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessiondError::BadState("manager is shutting down".into());
        assert_eq!(err.to_string(), "Bad state: manager is shutting down");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: SessiondError = io_err.into();
        assert!(matches!(err, SessiondError::Io(_)));
    }

    #[test]
    fn test_session_file_error_display() {
        let err = SessiondError::SessionFile {
            path: PathBuf::from("/tmp/session"),
            message: "missing Count".into(),
        };
        assert!(err.to_string().contains("/tmp/session"));
        assert!(err.to_string().contains("missing Count"));
    }
}
