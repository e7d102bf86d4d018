//! Write-Ahead Log (WAL) implementation
//!
//! Append-only logging of every write operation.
//!
//! ## Architecture
//!
//! - Single WAL file, replaced by an empty one after every compaction
//! - Each record is flushed before the write is acknowledged; fsync is optional
//! - CRC32 checksum on every entry for corruption detection
//!
//! ## File Naming
//!
//! - Active WAL: `wal-current.log`
//! - Replacement being prepared: `wal-current-new.log`

use super::format::{decode_wal_entry, encode_wal_entry, unix_nanos, WalEntry, WalHeader, WalOp};
use super::{PersistenceError, Result, StorageOptions};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const WAL_FILE: &str = "wal-current.log";
const WAL_REPLACEMENT_FILE: &str = "wal-current-new.log";
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Path of the active WAL inside a data directory
pub fn wal_path(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join(WAL_FILE)
}

/// WAL writer
pub struct WalWriter {
    file: BufWriter<File>,
    path: PathBuf,
    position: u64,
    /// End of the last successful commit
    committed: u64,
    unflushed_bytes: usize,
    max_record_size: usize,
    data_dir: PathBuf,
}

impl WalWriter {
    /// Open the active WAL for appending, creating it if missing
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|e| {
            PersistenceError::DataDirectory(format!("Failed to create directory: {}", e))
        })?;

        // Leftover from a reset interrupted before its rename
        let stale = data_dir.join(WAL_REPLACEMENT_FILE);
        if stale.exists() {
            debug!("Removing stale WAL replacement: {}", stale.display());
            fs::remove_file(&stale)?;
        }

        let wal_path = data_dir.join(WAL_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&wal_path)?;
        let position = file.metadata()?.len();

        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        if position == 0 {
            WalHeader::new().write(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            debug!("Created new WAL file: {}", wal_path.display());
        }

        let position = writer.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: writer,
            path: wal_path,
            position,
            committed: position,
            unflushed_bytes: 0,
            max_record_size: StorageOptions::default().max_record_size,
            data_dir,
        })
    }

    /// Refuse records the reader would reject as oversized
    pub fn with_max_record_size(mut self, bytes: usize) -> Self {
        self.max_record_size = bytes;
        self
    }

    /// Append an operation to the WAL buffer
    pub fn append(&mut self, op: &WalOp) -> Result<u64> {
        let encoded = encode_wal_entry(unix_nanos(), op)?;

        // Same measure as the length field checked on replay
        let size = encoded.len() - 4;
        if size > self.max_record_size {
            return Err(PersistenceError::RecordTooLarge {
                size,
                max: self.max_record_size,
            });
        }

        let position = self.position;
        self.file.write_all(&encoded)?;
        self.position += encoded.len() as u64;
        self.unflushed_bytes += encoded.len();

        Ok(position)
    }

    /// Hand buffered records to the OS, and fsync them when `sync` is set
    pub fn commit(&mut self, sync: bool) -> Result<()> {
        if self.unflushed_bytes == 0 {
            return Ok(());
        }

        self.file.flush()?;
        if sync {
            self.file.get_ref().sync_data()?;
        }

        debug!(
            "WAL committed {} bytes at position {} (sync: {})",
            self.unflushed_bytes, self.position, sync
        );
        self.unflushed_bytes = 0;
        self.committed = self.position;

        Ok(())
    }

    /// Throw away everything appended since the last successful commit:
    /// bytes still buffered and any already written past that point.
    pub fn discard_uncommitted(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.committed)?;

        let stale = std::mem::replace(
            &mut self.file,
            BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
        );
        // into_parts returns the buffer instead of flushing it
        let (_, _unwritten) = stale.into_parts();

        warn!("Discarded uncommitted WAL data after position {}", self.committed);
        self.position = self.committed;
        self.unflushed_bytes = 0;
        Ok(())
    }

    /// Close the file without flushing buffered records
    pub fn abandon(self) {
        let (_, _unwritten) = self.file.into_parts();
    }

    /// Replace the WAL with an empty one.
    ///
    /// Only valid once a snapshot covering every logged record is durable.
    pub fn reset(&mut self) -> Result<()> {
        self.commit(true)?;
        replace_with_empty(&self.data_dir)?;

        // Reopen in append mode so later writes land at the end
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.file = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        self.position = super::format::WAL_HEADER_SIZE;
        self.committed = self.position;
        self.unflushed_bytes = 0;

        info!("Reset WAL: {}", self.path.display());
        Ok(())
    }

    /// Get current file position
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn committed_position(&self) -> u64 {
        self.committed
    }

    /// Get the WAL file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Atomically replace the active WAL (damaged or not) with an empty one
pub fn replace_with_empty(data_dir: impl AsRef<Path>) -> Result<()> {
    let data_dir = data_dir.as_ref();

    // Create new WAL file first (before replacing the old one)
    let new_path = data_dir.join(WAL_REPLACEMENT_FILE);
    let new_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&new_path)?;
    let mut new_writer = BufWriter::new(new_file);
    WalHeader::new().write(&mut new_writer)?;
    new_writer.flush()?;
    new_writer.get_ref().sync_all()?;

    fs::rename(&new_path, data_dir.join(WAL_FILE))?;
    Ok(())
}

/// WAL reader for replaying entries
pub struct WalReader {
    file: File,
    path: PathBuf,
    position: u64,
    file_size: u64,
    max_record_size: usize,
}

impl WalReader {
    /// Open a WAL file for reading and validate its header
    pub fn new(path: impl AsRef<Path>, max_record_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;

        let _header = WalHeader::read(&mut file)?;

        let position = file.stream_position()?;
        let file_size = file.metadata()?.len();

        debug!("Opened WAL for reading: {} ({} bytes)", path.display(), file_size);

        Ok(Self {
            file,
            path,
            position,
            file_size,
            max_record_size,
        })
    }

    /// Read the next entry from the WAL.
    ///
    /// A record whose checksum or payload is bad is consumed before the error
    /// is returned, so the caller may skip it and keep reading. When the
    /// framing itself is damaged (length field or torn tail) the reader is
    /// exhausted: the next call returns `Ok(None)`.
    pub fn read_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.position >= self.file_size {
            return Ok(None); // EOF
        }

        let entry_pos = self.position;

        let mut length_bytes = [0u8; 4];
        if let Err(e) = self.file.read_exact(&mut length_bytes) {
            return Err(self.framing_error(e, entry_pos, "Torn entry length"));
        }

        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_record_size {
            self.position = self.file_size;
            return Err(PersistenceError::CorruptedWal {
                pos: entry_pos,
                reason: format!("Entry length too large: {} bytes", length),
            });
        }

        let mut entry_bytes = vec![0u8; 4 + length];
        entry_bytes[0..4].copy_from_slice(&length_bytes);
        if let Err(e) = self.file.read_exact(&mut entry_bytes[4..]) {
            return Err(self.framing_error(e, entry_pos, "Torn entry"));
        }

        self.position += (4 + length) as u64;

        let entry = decode_wal_entry(&entry_bytes, entry_pos)?;
        Ok(Some(entry))
    }

    fn framing_error(&mut self, e: std::io::Error, pos: u64, reason: &str) -> PersistenceError {
        self.position = self.file_size;
        if e.kind() == ErrorKind::UnexpectedEof {
            PersistenceError::CorruptedWal {
                pos,
                reason: reason.to_string(),
            }
        } else {
            PersistenceError::Io(e)
        }
    }

    /// Get current read position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get the WAL file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAX: usize = 10 * 1024 * 1024;

    fn put(key: &[u8], value: &[u8]) -> WalOp {
        WalOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_wal_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();

        let ops = vec![
            put(b"key1", b"value1"),
            put(b"key2", b"value2"),
            WalOp::Delete { key: b"key1".to_vec() },
        ];

        for op in &ops {
            writer.append(op).unwrap();
        }
        writer.commit(true).unwrap();

        let mut reader = WalReader::new(wal_path(data_dir), MAX).unwrap();

        let mut read_ops = Vec::new();
        while let Some(entry) = reader.read_entry().unwrap() {
            read_ops.push(entry.op);
        }

        assert_eq!(read_ops, ops);
    }

    #[test]
    fn test_wal_reopen_appends() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        {
            let mut writer = WalWriter::open(data_dir).unwrap();
            writer.append(&put(b"a", b"1")).unwrap();
            writer.commit(false).unwrap();
        }
        {
            let mut writer = WalWriter::open(data_dir).unwrap();
            writer.append(&put(b"b", b"2")).unwrap();
            writer.commit(false).unwrap();
        }

        let mut reader = WalReader::new(wal_path(data_dir), MAX).unwrap();
        let mut count = 0;
        while reader.read_entry().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_wal_reset() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();
        writer.append(&put(b"a", b"1")).unwrap();
        writer.reset().unwrap();
        assert_eq!(writer.position(), super::super::format::WAL_HEADER_SIZE);

        writer.append(&put(b"b", b"2")).unwrap();
        writer.commit(true).unwrap();

        let mut reader = WalReader::new(wal_path(data_dir), MAX).unwrap();
        let entry = reader.read_entry().unwrap().unwrap();
        assert_eq!(entry.op, put(b"b", b"2"));
        assert!(reader.read_entry().unwrap().is_none());
    }

    #[test]
    fn test_wal_corrupted_entry_is_skippable() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();
        writer.append(&put(b"first", b"value")).unwrap();
        writer.append(&put(b"second", b"value")).unwrap();
        writer.commit(true).unwrap();
        drop(writer);

        // Flip a byte inside the first record's timestamp
        let path = wal_path(data_dir);
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(super::super::format::WAL_HEADER_SIZE + 6)).unwrap();
        file.write_all(&[0xAB]).unwrap();
        drop(file);

        let mut reader = WalReader::new(&path, MAX).unwrap();
        assert!(matches!(
            reader.read_entry(),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));
        let entry = reader.read_entry().unwrap().unwrap();
        assert_eq!(entry.op, put(b"second", b"value"));
    }

    #[test]
    fn test_wal_torn_tail_exhausts_reader() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();
        writer.append(&put(b"a", b"1")).unwrap();
        writer.commit(true).unwrap();
        drop(writer);

        let path = wal_path(data_dir);
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let mut reader = WalReader::new(&path, MAX).unwrap();
        assert!(matches!(
            reader.read_entry(),
            Err(PersistenceError::CorruptedWal { .. })
        ));
        assert!(reader.read_entry().unwrap().is_none());
    }

    #[test]
    fn test_wal_bad_magic() {
        let temp_dir = TempDir::new().unwrap();
        let path = wal_path(temp_dir.path());
        fs::write(&path, [0u8; 32]).unwrap();

        let result = WalReader::new(&path, MAX);
        assert!(matches!(result, Err(PersistenceError::InvalidMagic { .. })));
    }

    #[test]
    fn test_oversized_record_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap().with_max_record_size(64);
        let result = writer.append(&put(b"big", &[0u8; 128]));
        assert!(matches!(
            result,
            Err(PersistenceError::RecordTooLarge { max: 64, .. })
        ));
        assert_eq!(writer.position(), super::super::format::WAL_HEADER_SIZE);

        writer.append(&put(b"small", b"v")).unwrap();
        writer.commit(false).unwrap();

        let mut reader = WalReader::new(wal_path(data_dir), 64).unwrap();
        assert_eq!(reader.read_entry().unwrap().unwrap().op, put(b"small", b"v"));
        assert!(reader.read_entry().unwrap().is_none());
    }

    #[test]
    fn test_discard_uncommitted_drops_buffered_records() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();
        writer.append(&put(b"kept", b"1")).unwrap();
        writer.commit(false).unwrap();
        let committed = writer.committed_position();

        // A record bigger than the buffer goes straight to the file
        writer.append(&put(b"failed", &vec![7u8; 2 * WRITE_BUFFER_SIZE])).unwrap();
        writer.append(&put(b"failed-too", b"2")).unwrap();
        writer.discard_uncommitted().unwrap();
        assert_eq!(writer.position(), committed);
        assert_eq!(fs::metadata(wal_path(data_dir)).unwrap().len(), committed);

        writer.append(&put(b"next", b"3")).unwrap();
        writer.commit(false).unwrap();
        drop(writer);

        let mut reader = WalReader::new(wal_path(data_dir), MAX).unwrap();
        let mut ops = Vec::new();
        while let Some(entry) = reader.read_entry().unwrap() {
            ops.push(entry.op);
        }
        assert_eq!(ops, vec![put(b"kept", b"1"), put(b"next", b"3")]);
    }

    #[test]
    fn test_abandon_does_not_flush() {
        let temp_dir = TempDir::new().unwrap();
        let data_dir = temp_dir.path();

        let mut writer = WalWriter::open(data_dir).unwrap();
        writer.append(&put(b"unacknowledged", b"1")).unwrap();
        writer.abandon();

        let mut reader = WalReader::new(wal_path(data_dir), MAX).unwrap();
        assert!(reader.read_entry().unwrap().is_none());
    }
}
