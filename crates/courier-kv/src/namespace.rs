//! Bucket-scoped view of a [`Storage`]

use crate::error::Result;
use crate::keys::{self, StoragePrefix};
use crate::storage::{KeyRange, Storage, StorageIterator};
use crate::transaction::Transaction;
use std::sync::Arc;

/// Scopes every operation to one bucket by prepending its prefix byte.
///
/// Holds no state besides the shared engine handle, so clones are cheap and
/// see the same data.
#[derive(Clone)]
pub struct Namespace {
    storage: Arc<dyn Storage>,
    prefix: StoragePrefix,
}

impl Namespace {
    pub fn new(storage: Arc<dyn Storage>, prefix: StoragePrefix) -> Self {
        Self { storage, prefix }
    }

    pub fn prefix(&self) -> StoragePrefix {
        self.prefix
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether both views sit on the same engine instance, and so can
    /// share one [`Transaction`]
    pub fn shares_storage(&self, other: &Namespace) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.storage) as *const (),
            Arc::as_ptr(&other.storage) as *const (),
        )
    }

    /// Engine key of `suffix` inside this bucket
    #[inline]
    pub fn absolute_key(&self, suffix: &[u8]) -> Vec<u8> {
        keys::key(self.prefix, &[suffix])
    }

    pub fn get(&self, suffix: &[u8]) -> Result<Vec<u8>> {
        self.storage.get(&self.absolute_key(suffix))
    }

    pub fn put(&self, suffix: &[u8], value: &[u8]) -> Result<()> {
        self.storage.put(&self.absolute_key(suffix), value)
    }

    pub fn delete(&self, suffix: &[u8]) -> Result<()> {
        self.storage.delete(&self.absolute_key(suffix))
    }

    /// Iterate `[lower, upper)` within the bucket. `None` bounds stop at the
    /// edges of the bucket; yielded keys have the prefix stripped.
    pub fn range(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> Result<NamespaceIterator> {
        let bucket = [self.prefix.as_byte()];
        let lower = match lower {
            Some(suffix) => self.absolute_key(suffix),
            None => bucket.to_vec(),
        };
        let upper = match upper {
            Some(suffix) => Some(self.absolute_key(suffix)),
            None => keys::prefix_successor(&bucket),
        };

        let inner = self.storage.new_iterator(KeyRange::new(Some(lower), upper))?;
        Ok(NamespaceIterator { inner })
    }

    /// Every entry of the bucket
    pub fn iter(&self) -> Result<NamespaceIterator> {
        self.range(None, None)
    }

    /// Start a transaction whose keys are scoped to this bucket
    pub fn transaction(&self) -> Transaction {
        Transaction::scoped(self.storage.clone(), self.prefix)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace").field("prefix", &self.prefix).finish()
    }
}

/// Iterator over one bucket, yielding `(suffix, value)` pairs
#[derive(Debug)]
pub struct NamespaceIterator {
    inner: StorageIterator,
}

impl NamespaceIterator {
    /// Restart from the first entry of the range
    pub fn rewind(&mut self) {
        self.inner.rewind();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Iterator for NamespaceIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(mut key, value)| {
            key.remove(0);
            (key, value)
        })
    }
}
