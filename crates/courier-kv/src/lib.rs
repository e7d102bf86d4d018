//! Ordered key-value storage for courier
//!
//! # Features
//! - [`Storage`] trait with an ephemeral in-memory engine and a WAL-backed
//!   disk engine (snapshots, CRC32-checked records, repair on corruption)
//! - Bucketed keyspace: one prefix byte per [`StoragePrefix`]
//! - [`Namespace`] views scoped to one bucket
//! - [`Transaction`] write buffers committed as one atomic [`WriteBatch`]
//!
//! ```no_run
//! use courier_kv::{Namespace, StorageOptions, StoragePrefix};
//!
//! # fn main() -> courier_kv::Result<()> {
//! let storage = courier_kv::create("/var/lib/node", "wnode", StorageOptions::default())?;
//! let peers = Namespace::new(storage, StoragePrefix::PeersCache);
//! peers.put(b"enode-1", b"{}")?;
//! # Ok(())
//! # }
//! ```

pub mod disk;
pub mod error;
pub mod keys;
pub mod memory;
pub mod namespace;
pub mod persistence;
pub mod storage;
pub mod transaction;

pub use disk::DiskStorage;
pub use error::{Result, StorageError};
pub use keys::{key, prefix_successor, StoragePrefix};
pub use memory::MemoryStorage;
pub use namespace::{Namespace, NamespaceIterator};
pub use persistence::{RecoveryStats, StorageOptions};
pub use storage::{create, open, BatchOp, KeyRange, Storage, StorageIterator, WriteBatch};
pub use transaction::Transaction;
