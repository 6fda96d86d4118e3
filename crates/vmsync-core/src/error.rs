//! Error types for the inventory sync system
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the inventory sync system
#[derive(Error, Debug)]
pub enum Error {
    /// A configured endpoint failed (transport, status, or body)
    #[error("Endpoint error ({endpoint}): {message}")]
    Endpoint {
        /// Endpoint name
        endpoint: String,
        /// Error message
        message: String,
    },

    /// An endpoint call exceeded its deadline
    #[error("Endpoint {endpoint} timed out after {secs}s")]
    Timeout {
        /// Endpoint name
        endpoint: String,
        /// Deadline that was exceeded
        secs: u64,
    },

    /// Entity store errors
    #[error("Entity store error: {0}")]
    Store(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source record could not be normalized
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// I/O errors (file store)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an endpoint error
    pub fn endpoint(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Endpoint {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(endpoint: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
            secs,
        }
    }

    /// Create an entity store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error belongs to a single endpoint and must not abort a run
    pub fn is_endpoint_local(&self) -> bool {
        matches!(
            self,
            Self::Endpoint { .. } | Self::Timeout { .. } | Self::Http(_) | Self::Json(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
