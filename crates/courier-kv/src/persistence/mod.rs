//! Persistence layer for the disk engine
//!
//! Provides crash-safe durability using a Write-Ahead Log (WAL) with
//! snapshot compaction.
//!
//! ## Architecture
//!
//! - **WAL**: append-only log of every write; one record per put, delete or batch
//! - **Snapshots**: full, checksummed image of the table; taken on compaction
//! - **Recovery**: load latest snapshot + replay WAL
//! - **Repair**: salvage every verifiable record when strict recovery reports corruption
//!
//! ## Durability Guarantee
//!
//! Records are written and flushed before the in-memory table changes. With
//! `sync_writes` (the default) every record is fsynced, so an acknowledged
//! write survives a crash.

pub mod format;
pub mod recovery;
pub mod snapshot;
pub mod wal;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Disk engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// fsync every WAL record before acknowledging the write (default: true)
    pub sync_writes: bool,

    /// WAL records after which the table is compacted into a snapshot
    /// (default: 10K, 0 disables automatic compaction)
    pub snapshot_ops_threshold: usize,

    /// Number of snapshots to keep (default: 2)
    pub keep_snapshots: usize,

    /// Largest WAL record, checked on append and on replay (default: 10MB)
    pub max_record_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            sync_writes: true,
            snapshot_ops_threshold: 10_000,
            keep_snapshots: 2,
            max_record_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_snapshot_ops_threshold(mut self, threshold: usize) -> Self {
        self.snapshot_ops_threshold = threshold;
        self
    }

    pub fn with_keep_snapshots(mut self, keep: usize) -> Self {
        self.keep_snapshots = keep.max(1);
        self
    }

    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }
}

/// Recovery statistics
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Whether a snapshot was loaded
    pub snapshot_loaded: bool,

    /// Number of entries loaded from snapshot
    pub snapshot_entries: usize,

    /// Number of WAL records replayed
    pub wal_entries_replayed: usize,

    /// Number of corrupted records or snapshots skipped
    pub corrupted_entries: usize,

    /// Total recovery duration
    pub recovery_duration: Duration,
}

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted WAL entry at position {pos}: {reason}")]
    CorruptedWal { pos: u64, reason: String },

    #[error("Corrupted snapshot: {0}")]
    CorruptedSnapshot(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Checksum mismatch at position {pos}: expected {expected:x}, got {actual:x}")]
    ChecksumMismatch {
        pos: u64,
        expected: u32,
        actual: u32,
    },

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("Invalid magic number: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Data directory error: {0}")]
    DataDirectory(String),

    #[error("Record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge { size: usize, max: usize },
}

impl PersistenceError {
    /// Returns true if the error describes damaged on-disk data rather
    /// than an environment failure
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistenceError::CorruptedWal { .. }
                | PersistenceError::CorruptedSnapshot(_)
                | PersistenceError::ChecksumMismatch { .. }
                | PersistenceError::UnsupportedVersion(_)
                | PersistenceError::InvalidMagic { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = StorageOptions::new()
            .with_sync_writes(false)
            .with_snapshot_ops_threshold(5)
            .with_keep_snapshots(0);

        assert!(!options.sync_writes);
        assert_eq!(options.snapshot_ops_threshold, 5);
        assert_eq!(options.keep_snapshots, 1);
        assert_eq!(options.max_record_size, StorageOptions::default().max_record_size);
    }

    #[test]
    fn test_corruption_classification() {
        assert!(PersistenceError::CorruptedSnapshot("x".into()).is_corruption());
        assert!(PersistenceError::UnsupportedVersion(9).is_corruption());
        assert!(!PersistenceError::DataDirectory("x".into()).is_corruption());
        assert!(!PersistenceError::RecordTooLarge { size: 2, max: 1 }.is_corruption());
        assert!(!PersistenceError::Io(std::io::Error::other("x")).is_corruption());
    }
}
