//! Ephemeral in-memory engine
//!
//! An ordered table behind a `RwLock`: concurrent reads, exclusive writes.

use crate::error::{Result, StorageError};
use crate::storage::{KeyRange, Storage, StorageIterator, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory [`Storage`] used for ephemeral stores and tests
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys across all buckets
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    #[inline]
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.data.read().get(key).cloned().ok_or(StorageError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.data.write().remove(key);
        Ok(())
    }

    fn write(&self, batch: &WriteBatch) -> Result<()> {
        self.ensure_open()?;
        batch.apply_to(&mut self.data.write());
        Ok(())
    }

    fn new_iterator(&self, range: KeyRange) -> Result<StorageIterator> {
        self.ensure_open()?;
        let entries = range.collect_from(&self.data.read());
        Ok(StorageIterator::new(entries))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
