//! Error types for the offline object store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A required caller argument was missing or empty. Raised before any
    /// tree is touched.
    #[error("parameter \"{0}\" not specified")]
    MissingParameter(&'static str),

    /// An operation needed the remote storage but none has been bound yet
    /// via `set_remote_object_storage`.
    #[error("remote object storage is not configured")]
    RemoteNotConfigured,

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure reported by a remote storage or local cache implementation.
    /// The store propagates these unchanged; there are no internal retries.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
