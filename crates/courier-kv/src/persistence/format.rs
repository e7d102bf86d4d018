//! Binary format definitions for WAL and Snapshot files
//!
//! ## WAL File Format
//!
//! ```text
//! Header: [Magic:8 | Version:4 | Created:8 | Reserved:12] = 32 bytes
//! Entry:  [Length:4 | Timestamp:8 | OpType:1 | Payload:N | CRC32:4]
//! ```
//!
//! ## Snapshot File Format
//!
//! ```text
//! Header: [Magic:8 | Version:4 | Created:8 | TotalEntries:8 | SHA256:32] = 60 bytes
//! Data:   bincode(ordered map of key -> value)
//! ```
//!
//! All integers are big-endian.

use crate::persistence::{PersistenceError, Result};
use crate::storage::WriteBatch;
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// WAL file magic number: "CRWAL001"
pub const WAL_MAGIC: &[u8; 8] = b"CRWAL001";

/// WAL format version
pub const WAL_VERSION: u32 = 1;

/// WAL header size in bytes
pub const WAL_HEADER_SIZE: u64 = 32;

/// Snapshot file magic number: "CRSNAP01"
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"CRSNAP01";

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Timestamp + op type + CRC32
const ENTRY_OVERHEAD: usize = 8 + 1 + 4;

/// WAL operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalOpType {
    Put = 1,
    Delete = 2,
    Batch = 3,
}

impl WalOpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(WalOpType::Put),
            2 => Some(WalOpType::Delete),
            3 => Some(WalOpType::Batch),
            _ => None,
        }
    }
}

/// WAL operation data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Batch(WriteBatch),
}

impl WalOp {
    pub fn op_type(&self) -> WalOpType {
        match self {
            WalOp::Put { .. } => WalOpType::Put,
            WalOp::Delete { .. } => WalOpType::Delete,
            WalOp::Batch(_) => WalOpType::Batch,
        }
    }
}

/// WAL entry with metadata
#[derive(Debug, Clone)]
pub struct WalEntry {
    /// Timestamp in nanoseconds since Unix epoch
    pub timestamp: i64,

    /// The operation
    pub op: WalOp,
}

/// Nanoseconds since the Unix epoch, clamped to zero for clocks before it
pub(crate) fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// WAL file header (32 bytes)
#[derive(Debug, Clone)]
pub struct WalHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub created_at: i64, // Unix timestamp in nanoseconds
}

impl WalHeader {
    pub fn new() -> Self {
        Self {
            magic: *WAL_MAGIC,
            version: WAL_VERSION,
            created_at: unix_nanos(),
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_be_bytes())?;
        writer.write_all(&self.created_at.to_be_bytes())?;
        writer.write_all(&[0u8; 12])?; // Reserved
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(truncated_header)?;

        if &magic != WAL_MAGIC {
            return Err(PersistenceError::InvalidMagic {
                expected: WAL_MAGIC.to_vec(),
                actual: magic.to_vec(),
            });
        }

        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes).map_err(truncated_header)?;
        let version = u32::from_be_bytes(version_bytes);

        if version != WAL_VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }

        let mut created_bytes = [0u8; 8];
        reader.read_exact(&mut created_bytes).map_err(truncated_header)?;
        let created_at = i64::from_be_bytes(created_bytes);

        let mut reserved = [0u8; 12];
        reader.read_exact(&mut reserved).map_err(truncated_header)?;

        Ok(Self {
            magic,
            version,
            created_at,
        })
    }
}

impl Default for WalHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A header cut short is damaged data, not an environment failure
fn truncated_header(e: std::io::Error) -> PersistenceError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PersistenceError::CorruptedWal {
            pos: 0,
            reason: "Truncated header".to_string(),
        }
    } else {
        PersistenceError::Io(e)
    }
}

/// Snapshot file header (60 bytes)
#[derive(Debug, Clone)]
pub struct SnapshotHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub created_at: i64,
    pub total_entries: u64,
    pub checksum: [u8; 32], // SHA256 of data
}

impl SnapshotHeader {
    pub const SIZE: usize = 8 + 4 + 8 + 8 + 32;

    pub fn new(total_entries: u64, checksum: [u8; 32]) -> Self {
        Self {
            magic: *SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            created_at: unix_nanos(),
            total_entries,
            checksum,
        }
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_be_bytes())?;
        writer.write_all(&self.created_at.to_be_bytes())?;
        writer.write_all(&self.total_entries.to_be_bytes())?;
        writer.write_all(&self.checksum)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PersistenceError::CorruptedSnapshot("Truncated header".to_string())
            } else {
                PersistenceError::Io(e)
            }
        })?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        if &magic != SNAPSHOT_MAGIC {
            return Err(PersistenceError::InvalidMagic {
                expected: SNAPSHOT_MAGIC.to_vec(),
                actual: magic.to_vec(),
            });
        }

        let version = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        if version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }

        let mut created = [0u8; 8];
        created.copy_from_slice(&buf[12..20]);
        let mut total = [0u8; 8];
        total.copy_from_slice(&buf[20..28]);
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&buf[28..60]);

        Ok(Self {
            magic,
            version,
            created_at: i64::from_be_bytes(created),
            total_entries: u64::from_be_bytes(total),
            checksum,
        })
    }
}

/// Calculate CRC32 checksum
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Calculate SHA256 checksum
pub fn calculate_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a WAL entry with checksum
pub fn encode_wal_entry(timestamp: i64, op: &WalOp) -> Result<Vec<u8>> {
    let op_bytes = bincode::serialize(op)?;

    // timestamp + op_type + payload + crc32
    let total_length = ENTRY_OVERHEAD + op_bytes.len();

    let mut buffer = Vec::with_capacity(4 + total_length);
    buffer.extend_from_slice(&(total_length as u32).to_be_bytes());
    buffer.extend_from_slice(&timestamp.to_be_bytes());
    buffer.push(op.op_type() as u8);
    buffer.extend_from_slice(&op_bytes);

    // Checksum of everything except length
    let checksum = calculate_crc32(&buffer[4..]);
    buffer.extend_from_slice(&checksum.to_be_bytes());

    Ok(buffer)
}

/// Decode a WAL entry and verify checksum
pub fn decode_wal_entry(data: &[u8], position: u64) -> Result<WalEntry> {
    if data.len() < 4 {
        return Err(PersistenceError::CorruptedWal {
            pos: position,
            reason: format!("Too short: {} bytes", data.len()),
        });
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length < ENTRY_OVERHEAD {
        return Err(PersistenceError::CorruptedWal {
            pos: position,
            reason: format!("Entry length too small: {} bytes", length),
        });
    }

    if data.len() < 4 + length {
        return Err(PersistenceError::CorruptedWal {
            pos: position,
            reason: format!("Incomplete entry: expected {} bytes, got {}", 4 + length, data.len()),
        });
    }

    let end = 4 + length;
    let expected_checksum =
        u32::from_be_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]]);
    let actual_checksum = calculate_crc32(&data[4..end - 4]);

    if expected_checksum != actual_checksum {
        return Err(PersistenceError::ChecksumMismatch {
            pos: position,
            expected: expected_checksum,
            actual: actual_checksum,
        });
    }

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&data[4..12]);
    let timestamp = i64::from_be_bytes(ts);

    let op_type_byte = data[12];
    let op_type = WalOpType::from_u8(op_type_byte).ok_or_else(|| PersistenceError::CorruptedWal {
        pos: position,
        reason: format!("Invalid op type: {}", op_type_byte),
    })?;

    let op: WalOp = bincode::deserialize(&data[13..end - 4]).map_err(|e| {
        PersistenceError::CorruptedWal {
            pos: position,
            reason: format!("Deserialization failed: {}", e),
        }
    })?;

    if op.op_type() != op_type {
        return Err(PersistenceError::CorruptedWal {
            pos: position,
            reason: format!("Op type {:?} does not match payload {:?}", op_type, op.op_type()),
        });
    }

    Ok(WalEntry { timestamp, op })
}
