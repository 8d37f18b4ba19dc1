//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error while staging a snapshot.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot blob could not be produced or loaded.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// A statement passed as a read would modify the dataset.
    #[error("statement is not read-only: {0}")]
    NotReadOnly(String),
}
