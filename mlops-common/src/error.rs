//! Common error types for the MLOps binaries

use thiserror::Error;

/// Common result type for MLOps operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the registry, serving and pipeline crates
#[derive(Error, Debug)]
pub enum Error {
    /// Tracking server unreachable, timed out or answered 5xx.
    ///
    /// Surfaced to the caller; retrying is the orchestrator's business.
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Tracking server rejected the request (4xx other than not-found)
    #[error("Registry rejected request: {0}")]
    Registry(String),

    /// Requested registry resource or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// No eligible candidate to promote or serve
    #[error("No champion found: {0}")]
    NoChampionFound(String),

    /// Malformed request body or input record
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model artifact could not be fetched or deserialized
    #[error("Model load failure: {0}")]
    ModelLoad(String),

    /// Tag/stage mutation applied only in part
    #[error("Partial promotion of {model} v{version}: {reason}")]
    PartialPromotion {
        model: String,
        version: u64,
        reason: String,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run-history database error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Whether the orchestrator may reasonably retry the failed step
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RegistryUnavailable(_))
    }
}
