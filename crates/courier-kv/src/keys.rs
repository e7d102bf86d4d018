//! Key construction for bucketed storage
//!
//! Every stored key is `prefix || part1 || part2 || ...` with no delimiters.
//! Parts must be fixed-width for prefix scans to stay correct, so callers
//! declare their widths as constants next to the types that produce them.

use serde::{Deserialize, Serialize};

/// One-byte tag identifying a logical bucket in the shared engine.
///
/// Discriminants are persisted in every key and must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StoragePrefix {
    /// Entries used by the peer pool cache
    PeersCache = 0,
    /// Message deduplication cache
    DeduplicatorCache = 1,
    /// Mail servers added by the user
    MailserversCache = 2,
    /// Per-topic history cursors
    TopicHistoryBucket = 3,
    /// Outstanding mailserver history requests
    HistoryRequestBucket = 4,
}

impl StoragePrefix {
    /// Raw byte written in front of every key of this bucket
    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StoragePrefix::PeersCache),
            1 => Some(StoragePrefix::DeduplicatorCache),
            2 => Some(StoragePrefix::MailserversCache),
            3 => Some(StoragePrefix::TopicHistoryBucket),
            4 => Some(StoragePrefix::HistoryRequestBucket),
            _ => None,
        }
    }
}

/// Build a key as `prefix || concat(parts)`.
pub fn key(prefix: StoragePrefix, parts: &[&[u8]]) -> Vec<u8> {
    let len = 1 + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.push(prefix.as_byte());
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

/// Smallest byte string strictly greater than every string starting with `prefix`.
///
/// Returns `None` when no such bound exists (empty or all `0xFF`), meaning the
/// scan is unbounded above.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}
