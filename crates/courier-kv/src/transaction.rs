//! Buffered writes applied on commit

use crate::error::Result;
use crate::keys::{self, StoragePrefix};
use crate::storage::{Storage, WriteBatch};
use std::sync::Arc;
use tracing::debug;

/// Write buffer over a [`Storage`].
///
/// Nothing is visible through the engine until [`Transaction::commit`], which
/// hands the whole buffer to [`Storage::write`] as one atomic batch. The
/// buffer is kept after commit, so committing again re-applies the same
/// idempotent writes. Dropping an uncommitted transaction discards it.
pub struct Transaction {
    storage: Arc<dyn Storage>,
    batch: WriteBatch,
    prefix: Option<StoragePrefix>,
}

impl Transaction {
    /// Transaction over raw engine keys
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            batch: WriteBatch::new(),
            prefix: None,
        }
    }

    /// Transaction whose keys are suffixes inside one bucket
    pub fn scoped(storage: Arc<dyn Storage>, prefix: StoragePrefix) -> Self {
        Self {
            storage,
            batch: WriteBatch::new(),
            prefix: Some(prefix),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        match self.prefix {
            Some(prefix) => keys::key(prefix, &[key]),
            None => key.to_vec(),
        }
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        let key = self.full_key(key);
        self.batch.put(key, value.to_vec());
    }

    pub fn delete(&mut self, key: &[u8]) {
        let key = self.full_key(key);
        self.batch.delete(key);
    }

    /// Number of buffered writes
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn commit(&self) -> Result<()> {
        debug!("Committing transaction with {} writes", self.batch.len());
        self.storage.write(&self.batch)
    }
}
