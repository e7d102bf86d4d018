//! WAL-backed disk engine
//!
//! The whole table lives in memory as an ordered map. Every write is logged
//! to the WAL (and fsynced when `sync_writes` is set) before the table
//! changes, so the table can always be rebuilt from the newest snapshot plus
//! the log.

use crate::error::{Result, StorageError};
use crate::persistence::format::WalOp;
use crate::persistence::recovery::{RecoveryManager, ReplayMode};
use crate::persistence::snapshot::{remove_temp_snapshots, SnapshotWriter, Table};
use crate::persistence::wal::WalWriter;
use crate::persistence::{RecoveryStats, StorageOptions};
use crate::storage::{KeyRange, Storage, StorageIterator, WriteBatch};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

struct WriterState {
    wal: WalWriter,
    ops_since_snapshot: usize,
}

/// Persistent [`Storage`] rooted at a data directory
pub struct DiskStorage {
    data_dir: PathBuf,
    options: StorageOptions,
    table: RwLock<Table>,
    /// `None` once closed
    writer: Mutex<Option<WriterState>>,
    closed: AtomicBool,
}

impl DiskStorage {
    /// Open (or create) the store in `data_dir`.
    ///
    /// Recovery is strict: any damaged snapshot or WAL record fails the open
    /// with [`StorageError::Corrupted`]. See [`DiskStorage::repair`].
    pub fn open(data_dir: impl AsRef<Path>, options: StorageOptions) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        let (table, stats) = RecoveryManager::recover(&data_dir, &options, ReplayMode::Strict)?;
        let wal = WalWriter::open(&data_dir)?.with_max_record_size(options.max_record_size);
        remove_temp_snapshots(&data_dir)?;

        info!(
            "Opened disk storage at {} ({} keys, {} WAL records replayed)",
            data_dir.display(),
            table.len(),
            stats.wal_entries_replayed
        );

        Ok(Self {
            data_dir,
            options,
            table: RwLock::new(table),
            writer: Mutex::new(Some(WriterState {
                wal,
                // Records still in the log count towards the next compaction
                ops_since_snapshot: stats.wal_entries_replayed,
            })),
            closed: AtomicBool::new(false),
        })
    }

    /// Salvage every readable record of a damaged store and rewrite it as one
    /// snapshot plus an empty WAL. The store must not be open.
    pub fn repair(data_dir: impl AsRef<Path>, options: &StorageOptions) -> Result<RecoveryStats> {
        Ok(RecoveryManager::repair(data_dir, options)?)
    }

    /// Write a snapshot of the full table and reset the WAL
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        let state = guard.as_mut().ok_or(StorageError::Closed)?;
        self.compact_locked(state)
    }

    fn compact_locked(&self, state: &mut WriterState) -> Result<()> {
        {
            let table = self.table.read();
            SnapshotWriter::new(self.options.keep_snapshots)
                .create_snapshot(&table, &self.data_dir)?;
        }
        state.wal.reset()?;

        debug!(
            "Compacted {} after {} WAL records",
            self.data_dir.display(),
            state.ops_since_snapshot
        );
        state.ops_since_snapshot = 0;
        Ok(())
    }

    /// Log `op`, then apply it to the table. Both happen under the writer
    /// lock so WAL order always matches table order.
    ///
    /// A record that fails to log leaves nothing behind in the WAL. If its
    /// bytes cannot be discarded the writer is dropped and every later write
    /// fails with [`StorageError::Closed`].
    fn log_and_apply(&self, op: WalOp) -> Result<()> {
        let mut guard = self.writer.lock();
        let state = guard.as_mut().ok_or(StorageError::Closed)?;

        let logged = state
            .wal
            .append(&op)
            .and_then(|_| state.wal.commit(self.options.sync_writes));
        if let Err(e) = logged {
            if let Err(discard) = state.wal.discard_uncommitted() {
                error!(
                    "Failed to discard a rejected WAL record in {}: {}; refusing further writes",
                    self.data_dir.display(),
                    discard
                );
                if let Some(state) = guard.take() {
                    state.wal.abandon();
                }
            } else {
                warn!("WAL write to {} failed: {}", self.data_dir.display(), e);
            }
            return Err(e.into());
        }

        RecoveryManager::apply_wal_operation(&mut self.table.write(), op);
        state.ops_since_snapshot += 1;

        let threshold = self.options.snapshot_ops_threshold;
        if threshold > 0 && state.ops_since_snapshot >= threshold {
            // The write itself is already durable
            if let Err(e) = self.compact_locked(state) {
                error!("Automatic compaction of {} failed: {}", self.data_dir.display(), e);
            }
        }
        Ok(())
    }

    #[inline]
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Number of stored keys across all buckets
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }
}

impl Storage for DiskStorage {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.table.read().get(key).cloned().ok_or(StorageError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.log_and_apply(WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.log_and_apply(WalOp::Delete { key: key.to_vec() })
    }

    fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.ensure_open()?;
        if batch.is_empty() {
            return Ok(());
        }
        self.log_and_apply(WalOp::Batch(batch.clone()))
    }

    fn new_iterator(&self, range: KeyRange) -> Result<StorageIterator> {
        self.ensure_open()?;
        let entries = range.collect_from(&self.table.read());
        Ok(StorageIterator::new(entries))
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        self.closed.store(true, Ordering::Release);
        if let Some(mut state) = guard.take() {
            state.wal.commit(true)?;
            info!("Closed disk storage at {}", self.data_dir.display());
        }
        Ok(())
    }
}

impl Drop for DiskStorage {
    fn drop(&mut self) {
        if let Some(state) = self.writer.get_mut().as_mut() {
            if let Err(e) = state.wal.commit(true) {
                error!("Failed to flush WAL on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::format::WAL_HEADER_SIZE;
    use crate::persistence::snapshot::find_snapshot_files;
    use crate::persistence::wal::wal_path;
    use std::fs;
    use tempfile::TempDir;

    fn options() -> StorageOptions {
        StorageOptions::default().with_sync_writes(false)
    }

    #[test]
    fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
            storage.put(b"a", b"1").unwrap();
            storage.put(b"b", b"2").unwrap();
            storage.delete(b"a").unwrap();

            let mut batch = WriteBatch::new();
            batch.put(b"c".to_vec(), b"3".to_vec());
            batch.put(b"b".to_vec(), b"22".to_vec());
            storage.write(&batch).unwrap();
            storage.close().unwrap();
        }

        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        assert!(storage.get(b"a").unwrap_err().is_not_found());
        assert_eq!(storage.get(b"b").unwrap(), b"22".to_vec());
        assert_eq!(storage.get(b"c").unwrap(), b"3".to_vec());
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_drop_without_close_keeps_writes() {
        let temp_dir = TempDir::new().unwrap();

        {
            let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
            storage.put(b"k", b"v").unwrap();
        }

        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        assert_eq!(storage.get(b"k").unwrap(), b"v".to_vec());
    }

    #[test]
    fn test_compaction_preserves_data_and_resets_wal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();

        for i in 0u8..20 {
            storage.put(&[i], &[i; 4]).unwrap();
        }
        assert!(fs::metadata(wal_path(temp_dir.path())).unwrap().len() > WAL_HEADER_SIZE);

        storage.compact().unwrap();
        assert_eq!(
            fs::metadata(wal_path(temp_dir.path())).unwrap().len(),
            WAL_HEADER_SIZE
        );
        assert_eq!(find_snapshot_files(temp_dir.path()).unwrap().len(), 1);

        storage.put(&[100], b"after").unwrap();
        storage.close().unwrap();
        drop(storage);

        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        assert_eq!(storage.len(), 21);
        assert_eq!(storage.get(&[7]).unwrap(), vec![7; 4]);
        assert_eq!(storage.get(&[100]).unwrap(), b"after".to_vec());
    }

    #[test]
    fn test_automatic_compaction_threshold() {
        let temp_dir = TempDir::new().unwrap();
        let options = options().with_snapshot_ops_threshold(5).with_keep_snapshots(2);
        let storage = DiskStorage::open(temp_dir.path(), options.clone()).unwrap();

        for i in 0u8..4 {
            storage.put(&[i], b"x").unwrap();
        }
        assert!(find_snapshot_files(temp_dir.path()).unwrap().is_empty());

        storage.put(&[4], b"x").unwrap();
        assert_eq!(find_snapshot_files(temp_dir.path()).unwrap().len(), 1);

        for i in 5u8..15 {
            storage.put(&[i], b"x").unwrap();
        }
        // Older snapshots are pruned
        assert_eq!(find_snapshot_files(temp_dir.path()).unwrap().len(), 2);
        drop(storage);

        let storage = DiskStorage::open(temp_dir.path(), options).unwrap();
        assert_eq!(storage.len(), 15);
    }

    #[test]
    fn test_batch_is_one_wal_record() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
            let mut batch = WriteBatch::new();
            for i in 0u8..10 {
                batch.put(vec![i], vec![i]);
            }
            storage.write(&batch).unwrap();
            // Empty batches are not logged
            storage.write(&WriteBatch::new()).unwrap();
        }

        let (_, stats) =
            RecoveryManager::recover(temp_dir.path(), &options(), ReplayMode::Strict).unwrap();
        assert_eq!(stats.wal_entries_replayed, 1);
    }

    #[test]
    fn test_closed_storage_rejects_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        storage.put(b"a", b"1").unwrap();
        storage.close().unwrap();

        assert!(matches!(storage.get(b"a"), Err(StorageError::Closed)));
        assert!(matches!(storage.put(b"a", b"2"), Err(StorageError::Closed)));
        assert!(matches!(storage.compact(), Err(StorageError::Closed)));
        assert!(matches!(
            storage.new_iterator(KeyRange::all()),
            Err(StorageError::Closed)
        ));
        storage.close().unwrap();
    }

    #[test]
    fn test_oversized_write_is_rejected_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let options = options().with_max_record_size(1024);
        let storage = DiskStorage::open(temp_dir.path(), options.clone()).unwrap();
        storage.put(b"before", b"1").unwrap();
        let wal_len = fs::metadata(wal_path(temp_dir.path())).unwrap().len();

        let result = storage.put(b"big", &[0u8; 2048]);
        assert!(matches!(
            result,
            Err(StorageError::RecordTooLarge { max: 1024, .. })
        ));
        assert!(storage.get(b"big").unwrap_err().is_not_found());
        assert_eq!(fs::metadata(wal_path(temp_dir.path())).unwrap().len(), wal_len);

        let mut batch = WriteBatch::new();
        batch.put(b"x".to_vec(), vec![1; 600]);
        batch.put(b"y".to_vec(), vec![2; 600]);
        assert!(storage.write(&batch).is_err());
        assert!(storage.get(b"x").unwrap_err().is_not_found());

        storage.put(b"after", b"2").unwrap();
        storage.close().unwrap();
        drop(storage);

        let storage = DiskStorage::open(temp_dir.path(), options).unwrap();
        assert_eq!(storage.get(b"before").unwrap(), b"1".to_vec());
        assert_eq!(storage.get(b"after").unwrap(), b"2".to_vec());
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_open_sweeps_unfinished_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("snapshot-00000000000000000001.tmp");
        fs::write(&stale, b"half written").unwrap();

        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        assert!(!stale.exists());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_corrupted_wal_fails_strict_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
            storage.put(b"a", b"1").unwrap();
        }

        let path = wal_path(temp_dir.path());
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let result = DiskStorage::open(temp_dir.path(), options());
        assert!(result.err().unwrap().is_corrupted());

        let stats = DiskStorage::repair(temp_dir.path(), &options()).unwrap();
        assert_eq!(stats.corrupted_entries, 1);
        let storage = DiskStorage::open(temp_dir.path(), options()).unwrap();
        assert!(storage.is_empty());
    }
}
