//! Error types for the repository core

use tdrepo_store::StoreError;
use thiserror::Error;

/// Result type alias using the repository's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the repository core
#[derive(Debug, Error)]
pub enum Error {
    // ============ Client Errors ============
    /// Malformed query, malformed document body or identifier collision
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Referenced document is absent (expired, deleted or never registered)
    #[error("Not found: {0}")]
    NotFound(String),

    // ============ Store Errors ============
    /// Underlying store failed; any open transaction was rolled back
    #[error("Store error: {0}")]
    Store(StoreError),

    // ============ Best-effort Errors ============
    /// Keyword extraction or annotation input could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    // ============ System Errors ============
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Response serialization failed
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the caller is at fault (4xx) rather than the server (5xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::BadRequest(_) | Self::NotFound(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DocumentNotFound(uri) => Self::NotFound(uri),
            e if e.is_client_error() => Self::BadRequest(e.to_string()),
            e => Self::Store(e),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking task failed: {}", err))
    }
}
