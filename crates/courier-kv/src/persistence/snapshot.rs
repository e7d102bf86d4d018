//! Snapshot creation and loading
//!
//! A snapshot is a full, checksummed image of the ordered table. Taking one
//! lets the WAL be reset, bounding replay time on the next open.

use super::format::{calculate_sha256, unix_nanos, SnapshotHeader};
use super::{PersistenceError, Result};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Ordered table image stored in a snapshot
pub type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Snapshot writer
pub struct SnapshotWriter {
    keep_count: usize,
}

impl SnapshotWriter {
    pub fn new(keep_count: usize) -> Self {
        Self {
            keep_count: keep_count.max(1),
        }
    }

    /// Write a snapshot of `table` into `data_dir`.
    ///
    /// The file is written under a temporary name, fsynced, then renamed, so
    /// a crash never leaves a half-written `.snap` behind.
    pub fn create_snapshot(&self, table: &Table, data_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;

        // Names must keep increasing even if the clock steps back
        let newest = find_snapshot_files(data_dir)?
            .last()
            .and_then(|p| snapshot_timestamp(p))
            .unwrap_or(0);
        let timestamp = unix_nanos().max(newest.saturating_add(1));
        let temp_path = data_dir.join(format!("snapshot-{:020}.tmp", timestamp));
        let final_path = data_dir.join(format!("snapshot-{:020}.snap", timestamp));

        let data_buffer = bincode::serialize(table)?;
        let header = SnapshotHeader::new(table.len() as u64, calculate_sha256(&data_buffer));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        header.write(&mut writer)?;
        writer.write_all(&data_buffer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?; // fsync

        fs::rename(&temp_path, &final_path)?;
        sync_dir(data_dir);

        info!(
            "Snapshot created: {} ({} entries, {} bytes)",
            final_path.display(),
            table.len(),
            data_buffer.len()
        );

        self.cleanup_old_snapshots(data_dir)?;
        remove_temp_snapshots(data_dir)?;

        Ok(final_path)
    }

    /// Keep only the N most recent snapshots
    fn cleanup_old_snapshots(&self, data_dir: &Path) -> Result<()> {
        let mut snapshots = find_snapshot_files(data_dir)?;

        if snapshots.len() <= self.keep_count {
            return Ok(());
        }

        // Newest first
        snapshots.sort_by(|a, b| b.cmp(a));

        for path in &snapshots[self.keep_count..] {
            debug!("Deleting old snapshot: {}", path.display());
            fs::remove_file(path)?;
        }

        Ok(())
    }
}

/// Delete `.tmp` files left by a snapshot that never reached its rename.
///
/// Must not run concurrently with [`SnapshotWriter::create_snapshot`] on the
/// same directory. Returns how many were removed.
pub fn remove_temp_snapshots(data_dir: impl AsRef<Path>) -> Result<usize> {
    let data_dir = data_dir.as_ref();
    if !data_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(data_dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with("snapshot-") && name.ends_with(".tmp"));
        if is_temp && path.is_file() {
            warn!("Removing unfinished snapshot: {}", path.display());
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn snapshot_timestamp(path: &Path) -> Option<i64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("snapshot-")?
        .strip_suffix(".snap")?
        .parse()
        .ok()
}

/// Make a rename durable. Best effort: not every platform can fsync a directory.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Snapshot loader
pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Load and verify a single snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Table> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let header = SnapshotHeader::read(&mut reader)?;

        let mut data_buffer = Vec::new();
        reader.read_to_end(&mut data_buffer)?;

        let computed = calculate_sha256(&data_buffer);
        if computed != header.checksum {
            return Err(PersistenceError::CorruptedSnapshot(format!(
                "{}: SHA256 mismatch",
                path.display()
            )));
        }

        let table: Table = bincode::deserialize(&data_buffer).map_err(|e| {
            PersistenceError::CorruptedSnapshot(format!("{}: {}", path.display(), e))
        })?;

        if table.len() as u64 != header.total_entries {
            return Err(PersistenceError::CorruptedSnapshot(format!(
                "{}: header lists {} entries, found {}",
                path.display(),
                header.total_entries,
                table.len()
            )));
        }

        debug!("Loaded snapshot {} ({} entries)", path.display(), table.len());
        Ok(table)
    }

    /// Load the newest snapshot; any damage is an error
    pub fn load_latest(data_dir: impl AsRef<Path>) -> Result<Option<Table>> {
        match find_snapshot_files(data_dir)?.last() {
            Some(latest) => Self::load(latest).map(Some),
            None => Ok(None),
        }
    }

    /// Load the newest readable snapshot, skipping damaged ones.
    ///
    /// Returns the table (if any snapshot was readable) and how many
    /// snapshots were skipped.
    pub fn load_newest_readable(data_dir: impl AsRef<Path>) -> Result<(Option<Table>, usize)> {
        let mut skipped = 0;
        for path in find_snapshot_files(data_dir)?.iter().rev() {
            match Self::load(path) {
                Ok(table) => return Ok((Some(table), skipped)),
                Err(e) if e.is_corruption() => {
                    warn!("Skipping damaged snapshot {}: {}", path.display(), e);
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((None, skipped))
    }
}

/// Find all snapshot files in directory, sorted by timestamp (oldest first)
pub fn find_snapshot_files(data_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let data_dir = data_dir.as_ref();

    if !data_dir.exists() {
        return Ok(Vec::new());
    }

    let mut snapshots = Vec::new();

    for entry in fs::read_dir(data_dir)? {
        let path = entry?.path();

        if path.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with("snapshot-") && name.ends_with(".snap") {
                    snapshots.push(path);
                }
            }
        }
    }

    // Zero-padded timestamps sort lexically
    snapshots.sort();

    Ok(snapshots)
}
