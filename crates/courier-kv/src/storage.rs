//! Storage abstraction over an ordered byte-key engine
//!
//! Engines implement [`Storage`]; everything above (namespaces, transactions,
//! history bookkeeping) only talks to the trait. [`open`] picks the engine:
//! an empty path gives an ephemeral [`MemoryStorage`], anything else a
//! WAL-backed [`DiskStorage`] rooted at that directory.

use crate::disk::DiskStorage;
use crate::error::{Result, StorageError};
use crate::memory::MemoryStorage;
use crate::persistence::StorageOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Ordered byte-key/value engine.
///
/// Implementations follow the "many readers, one writer" contract and add
/// no caching of their own.
pub trait Storage: Send + Sync {
    /// Read a value; an absent key yields [`StorageError::NotFound`].
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Insert or overwrite a value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key; removing an absent key succeeds
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply every operation of the batch in order, atomically with respect
    /// to readers and to crash recovery.
    fn write(&self, batch: &WriteBatch) -> Result<()>;

    /// Forward iterator over a point-in-time view of `range`
    fn new_iterator(&self, range: KeyRange) -> Result<StorageIterator>;

    /// Flush and release the engine. Later calls return [`StorageError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Half-open key interval `[lower, upper)`; `None` bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Option<Vec<u8>>,
    pub upper: Option<Vec<u8>>,
}

impl KeyRange {
    pub fn new(lower: Option<Vec<u8>>, upper: Option<Vec<u8>>) -> Self {
        Self { lower, upper }
    }

    /// Every key of the engine
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            lower: Some(prefix.to_vec()),
            upper: crate::keys::prefix_successor(prefix),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above = self.lower.as_deref().map_or(true, |l| key >= l);
        let below = self.upper.as_deref().map_or(true, |u| key < u);
        above && below
    }

    /// Copy the entries of an ordered table that fall in this range
    pub(crate) fn collect_from(
        &self,
        table: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        if let (Some(l), Some(u)) = (&self.lower, &self.upper) {
            if l >= u {
                return Vec::new();
            }
        }
        let lower = match &self.lower {
            Some(l) => Bound::Included(l.as_slice()),
            None => Bound::Unbounded,
        };
        let upper = match &self.upper {
            Some(u) => Bound::Excluded(u.as_slice()),
            None => Bound::Unbounded,
        };
        table
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Forward-only, restartable iterator over an owned snapshot of a range.
///
/// The snapshot is released when the iterator is dropped, so every exit
/// path (including `?` early returns) frees it.
#[derive(Debug, Default)]
pub struct StorageIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
}

impl StorageIterator {
    pub(crate) fn new(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self { entries, position: 0 }
    }

    /// Restart from the first entry of the range
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Number of entries captured in the snapshot
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Iterator for StorageIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.entries.get(self.position).cloned();
        if item.is_some() {
            self.position += 1;
        }
        item
    }
}

/// Single buffered write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered list of writes applied as one unit by [`Storage::write`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Apply the batch, in order, to an ordered table
    pub(crate) fn apply_to(&self, table: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        for op in &self.ops {
            match op {
                BatchOp::Put { key, value } => {
                    table.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    table.remove(key);
                }
            }
        }
    }
}

/// Open a store.
///
/// An empty `path` yields an ephemeral in-memory store. Otherwise the disk
/// engine is opened; if it reports corruption, one repair pass salvages the
/// readable records and the open is retried once. A second failure is fatal
/// and reported as [`StorageError::OpenFailed`].
pub fn open(path: impl AsRef<Path>, options: StorageOptions) -> Result<Arc<dyn Storage>> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        info!("Opening ephemeral in-memory storage");
        return Ok(Arc::new(MemoryStorage::new()));
    }

    match DiskStorage::open(path, options.clone()) {
        Ok(storage) => Ok(Arc::new(storage)),
        Err(e) if e.is_corrupted() => {
            warn!("Storage at {} is corrupted ({}), attempting repair", path.display(), e);
            let stats = DiskStorage::repair(path, &options).map_err(|e| {
                error!("Repair of {} failed: {}", path.display(), e);
                StorageError::OpenFailed {
                    path: path.to_path_buf(),
                    reason: format!("repair failed: {}", e),
                }
            })?;
            warn!(
                "Repair salvaged {} records ({} corrupted records dropped)",
                stats.snapshot_entries + stats.wal_entries_replayed,
                stats.corrupted_entries
            );
            DiskStorage::open(path, options)
                .map(|storage| Arc::new(storage) as Arc<dyn Storage>)
                .map_err(|e| StorageError::OpenFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
        }
        Err(e) => Err(e),
    }
}

/// Open the store named `name` inside `data_dir`
pub fn create(
    data_dir: impl AsRef<Path>,
    name: &str,
    options: StorageOptions,
) -> Result<Arc<dyn Storage>> {
    open(data_dir.as_ref().join(name), options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut t = BTreeMap::new();
        for k in [vec![1u8], vec![1, 0], vec![1, 5], vec![2], vec![3, 0]] {
            t.insert(k.clone(), k);
        }
        t
    }

    #[test]
    fn test_range_is_half_open() {
        let range = KeyRange::new(Some(vec![1, 0]), Some(vec![2]));
        let keys: Vec<_> = range.collect_from(&table()).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![1, 0], vec![1, 5]]);
    }

    #[test]
    fn test_prefix_range() {
        let keys: Vec<_> = KeyRange::prefix(&[1])
            .collect_from(&table())
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![vec![1], vec![1, 0], vec![1, 5]]);
        assert!(KeyRange::prefix(&[1]).contains(&[1, 9, 9]));
        assert!(!KeyRange::prefix(&[1]).contains(&[2]));
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let range = KeyRange::new(Some(vec![3]), Some(vec![1]));
        assert!(range.collect_from(&table()).is_empty());
    }

    #[test]
    fn test_iterator_rewind() {
        let mut it = StorageIterator::new(KeyRange::all().collect_from(&table()));
        assert_eq!(it.len(), 5);
        assert_eq!(it.by_ref().count(), 5);
        assert!(it.next().is_none());
        it.rewind();
        assert_eq!(it.next().map(|(k, _)| k), Some(vec![1]));
    }

    #[test]
    fn test_batch_applies_in_order() {
        let mut batch = WriteBatch::new();
        batch.put(vec![7], vec![1]);
        batch.delete(vec![7]);
        batch.put(vec![8], vec![2]);
        batch.put(vec![8], vec![3]);

        let mut t = BTreeMap::new();
        batch.apply_to(&mut t);
        assert_eq!(t.get(&vec![7]), None);
        assert_eq!(t.get(&vec![8]), Some(&vec![3]));
    }

    #[test]
    fn test_open_empty_path_is_ephemeral() {
        let storage = open("", StorageOptions::default()).unwrap();
        storage.put(b"k", b"v").unwrap();
        assert_eq!(storage.get(b"k").unwrap(), b"v".to_vec());
    }
}
