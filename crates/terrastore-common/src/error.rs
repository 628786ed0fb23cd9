use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error payload produced by a command processor.
///
/// Carries a numeric code in the HTTP status space so the front-end
/// collaborator can map it straight onto a response status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

impl ErrorMessage {
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const INTERNAL: u16 = 500;
    pub const UNAVAILABLE: u16 = 503;

    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Self::UNAVAILABLE, message)
    }
}

impl std::fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Error taxonomy shared by every Terrastore layer.
///
/// The failover decorator retries only the two transport classes
/// (`MissingRoute` and `Communication`); the remaining variants represent a
/// decision taken by a node or a malformed input and are surfaced unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TerrastoreError {
    /// No node owns the request: empty ring, unknown cluster, or a broadcast
    /// that could not reach every cluster.
    #[error("Missing route: {0}")]
    MissingRoute(String),

    /// Transport failed: disconnected peer, send timeout, or a frame that
    /// could not be decoded.
    #[error("Communication error: {0}")]
    Communication(String),

    /// The remote node executed the command and reported a failure.
    #[error("Processing error: {0}")]
    Processing(ErrorMessage),

    /// Malformed input, e.g. a payload that is not valid JSON.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown command kind or protocol version; fatal for the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TerrastoreError {
    /// Whether the failover decorator may retry the operation.
    ///
    /// Only transport failures are transient; a `Processing` or `Validation`
    /// error is a decision by the remote, not a delivery problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TerrastoreError::MissingRoute(_) | TerrastoreError::Communication(_)
        )
    }

    /// Shorthand for a `Processing` error with an internal-error code.
    pub fn internal(message: impl Into<String>) -> Self {
        TerrastoreError::Processing(ErrorMessage::new(ErrorMessage::INTERNAL, message))
    }
}

impl From<serde_json::Error> for TerrastoreError {
    fn from(err: serde_json::Error) -> Self {
        TerrastoreError::Communication(format!("Decode error: {}", err))
    }
}

impl From<std::io::Error> for TerrastoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TerrastoreError::Communication("I/O timeout".to_string())
            }
            _ => TerrastoreError::Communication(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TerrastoreError>;
