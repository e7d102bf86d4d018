//! Recovery orchestration
//!
//! Coordinates loading snapshots and replaying the WAL on open, and the
//! salvage pass used to repair a store that reported corruption.

use super::format::WalOp;
use super::snapshot::{SnapshotLoader, SnapshotWriter, Table};
use super::wal::{self, WalReader};
use super::{PersistenceError, RecoveryStats, Result, StorageOptions};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How damaged records are treated during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Any damage aborts recovery with a corruption error
    Strict,
    /// Damaged snapshots and records are skipped and counted
    Salvage,
}

/// Recovery manager for loading persisted state
pub struct RecoveryManager;

impl RecoveryManager {
    /// Rebuild the table from snapshot and WAL.
    ///
    /// Recovery process:
    /// 1. Load latest snapshot (if exists)
    /// 2. Replay every WAL record on top of it
    ///
    /// Replaying records a snapshot already reflects is harmless: every
    /// operation is an idempotent put or delete.
    pub fn recover(
        data_dir: impl AsRef<Path>,
        options: &StorageOptions,
        mode: ReplayMode,
    ) -> Result<(Table, RecoveryStats)> {
        let data_dir = data_dir.as_ref();
        let start = Instant::now();
        let mut stats = RecoveryStats::default();

        info!("Starting recovery from {} ({:?})", data_dir.display(), mode);

        let snapshot = match mode {
            ReplayMode::Strict => SnapshotLoader::load_latest(data_dir)?,
            ReplayMode::Salvage => {
                let (table, skipped) = SnapshotLoader::load_newest_readable(data_dir)?;
                stats.corrupted_entries += skipped;
                table
            }
        };

        let mut table = match snapshot {
            Some(table) => {
                stats.snapshot_loaded = true;
                stats.snapshot_entries = table.len();
                info!("Loaded {} entries from snapshot", table.len());
                table
            }
            None => {
                info!("No snapshot found, starting from empty state");
                Table::new()
            }
        };

        let wal_path = wal::wal_path(data_dir);
        if wal_path.exists() {
            let (replayed, corrupted) =
                Self::replay_wal(&mut table, &wal_path, options.max_record_size, mode)?;
            stats.wal_entries_replayed = replayed;
            stats.corrupted_entries += corrupted;
            info!(
                "Replayed {} WAL entries ({} corrupted/skipped)",
                replayed, corrupted
            );
        } else {
            info!("No WAL file found");
        }

        stats.recovery_duration = start.elapsed();
        info!(
            "Recovery complete in {:?}: {} entries",
            stats.recovery_duration,
            table.len()
        );

        Ok((table, stats))
    }

    /// Salvage every readable record, then rewrite the store as one fresh
    /// snapshot and an empty WAL so a strict open succeeds afterwards.
    pub fn repair(data_dir: impl AsRef<Path>, options: &StorageOptions) -> Result<RecoveryStats> {
        let data_dir = data_dir.as_ref();
        if !data_dir.is_dir() {
            return Err(PersistenceError::DataDirectory(format!(
                "{} is not a directory",
                data_dir.display()
            )));
        }

        let (table, stats) = Self::recover(data_dir, options, ReplayMode::Salvage)?;

        SnapshotWriter::new(options.keep_snapshots).create_snapshot(&table, data_dir)?;
        wal::replace_with_empty(data_dir)?;

        warn!(
            "Repaired {}: kept {} entries, dropped {} damaged records",
            data_dir.display(),
            table.len(),
            stats.corrupted_entries
        );
        Ok(stats)
    }

    /// Replay a single WAL file
    ///
    /// Returns (entries_replayed, corrupted_entries)
    fn replay_wal(
        table: &mut Table,
        wal_path: &Path,
        max_record_size: usize,
        mode: ReplayMode,
    ) -> Result<(usize, usize)> {
        let mut reader = match WalReader::new(wal_path, max_record_size) {
            Ok(reader) => reader,
            Err(e) if e.is_corruption() && mode == ReplayMode::Salvage => {
                warn!("Unreadable WAL header in {}: {}", wal_path.display(), e);
                return Ok((0, 1));
            }
            Err(e) => return Err(e),
        };

        let mut replayed = 0;
        let mut corrupted = 0;

        loop {
            match reader.read_entry() {
                Ok(Some(entry)) => {
                    Self::apply_wal_operation(table, entry.op);
                    replayed += 1;
                }
                Ok(None) => break,
                Err(e) if e.is_corruption() && mode == ReplayMode::Salvage => {
                    warn!("Skipping corrupted WAL entry: {}", e);
                    corrupted += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Finished {} at position {} of {}",
            reader.path().display(),
            reader.position(),
            reader.file_size()
        );
        Ok((replayed, corrupted))
    }

    /// Apply a single WAL operation to the table
    pub(crate) fn apply_wal_operation(table: &mut Table, op: WalOp) {
        match op {
            WalOp::Put { key, value } => {
                table.insert(key, value);
            }
            WalOp::Delete { key } => {
                table.remove(&key);
            }
            WalOp::Batch(batch) => batch.apply_to(table),
        }
    }
}
