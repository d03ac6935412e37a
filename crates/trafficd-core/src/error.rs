//! Error types for the dispatch server.
//!
//! Errors fall into two groups: conditions the server recovers from locally
//! (malformed frames, unbound senders), and conditions that are surfaced to
//! the bus as failure envelopes or returned to the caller of `run`.

use crate::inference::InferenceError;
use crate::wire::frame::DecodeError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for trafficd.
#[derive(Debug, Error)]
pub enum DispatchError {
    // Wire errors
    #[error("Malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("Frame argument {field} is {len} bytes, capacity is {capacity}")]
    ArgumentTooLong {
        field: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("Datagram arrived from an unbound sender")]
    UnboundSender,

    #[error("Invalid message kind {kind} for message {id}")]
    InvalidMessage { id: u16, kind: u8 },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Inference errors
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    // Delivery errors
    #[error("Publish failed: {message}")]
    Publish { message: String, retryable: bool },

    #[error("Upload of {name} failed: {message}")]
    Upload { name: String, message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for trafficd operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        // Anything that failed before a status came back is worth another try.
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        DispatchError::Publish {
            message: err.to_string(),
            retryable,
        }
    }
}

impl DispatchError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        DispatchError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a publish retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Publish { retryable: true, .. })
    }

    /// Whether the server loop can drop the datagram and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DispatchError::Decode(_) | DispatchError::UnboundSender
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::InvalidMessage { id: 7, kind: 99 };
        assert_eq!(err.to_string(), "Invalid message kind 99 for message 7");
    }

    #[test]
    fn test_decode_error_is_recoverable() {
        let err: DispatchError = DecodeError::Length { actual: 10 }.into();
        assert!(err.is_recoverable());
        assert!(DispatchError::UnboundSender.is_recoverable());
        assert!(!DispatchError::Config {
            message: "missing socket path".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DispatchError::Publish {
            message: "503".into(),
            retryable: true
        }
        .is_retryable());
        assert!(!DispatchError::Publish {
            message: "400".into(),
            retryable: false
        }
        .is_retryable());
        assert!(!DispatchError::UnboundSender.is_retryable());
    }

    #[test]
    fn test_io_with_path_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        match DispatchError::io_with_path(io, "/tmp/a.png") {
            DispatchError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/a.png")));
            }
            other => panic!("Expected Io, got: {:?}", other),
        }
    }
}
