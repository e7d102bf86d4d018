//! Storage error types

use std::path::PathBuf;
use thiserror::Error;

use crate::persistence::PersistenceError;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors surfaced by every [`Storage`](crate::Storage) engine
#[derive(Error, Debug)]
pub enum StorageError {
    /// The key is absent. Callers decide whether that means "use defaults".
    #[error("Key not found")]
    NotFound,

    /// The engine detected damaged on-disk state
    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Open failed even after the single repair attempt
    #[error("Failed to open storage at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    /// The write was rejected before reaching the log
    #[error("Record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Storage is closed")]
    Closed,
}

impl StorageError {
    /// Returns true if the key was simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }

    /// Returns true if the engine reported on-disk corruption
    pub fn is_corrupted(&self) -> bool {
        matches!(self, StorageError::Corrupted(_))
    }
}

impl From<PersistenceError> for StorageError {
    fn from(err: PersistenceError) -> Self {
        if err.is_corruption() {
            return StorageError::Corrupted(err.to_string());
        }
        match err {
            PersistenceError::Io(e) => StorageError::Io(e),
            PersistenceError::Serialization(e) => StorageError::Encoding(e),
            PersistenceError::DataDirectory(reason) => {
                StorageError::Io(std::io::Error::other(reason))
            }
            PersistenceError::RecordTooLarge { size, max } => {
                StorageError::RecordTooLarge { size, max }
            }
            other => StorageError::Corrupted(other.to_string()),
        }
    }
}
