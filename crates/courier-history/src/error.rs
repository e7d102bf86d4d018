//! History error types

use courier_kv::StorageError;
use thiserror::Error;

/// Result type alias for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Persisted bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] bincode::Error),

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("Invalid timestamp: {0} seconds")]
    InvalidTimestamp(i64),

    #[error("Invalid hex identifier: {0}")]
    InvalidHex(String),
}

impl HistoryError {
    /// Returns true if the row was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, HistoryError::Storage(e) if e.is_not_found())
    }
}
