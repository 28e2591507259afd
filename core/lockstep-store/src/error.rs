//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint violated.
    #[error("conflict: {0}")]
    Conflict(String),
}
