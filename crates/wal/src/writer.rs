use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::{WalError, WalRecord, OP_DEL, OP_PUT};

/// Append-only WAL writer for a single file.
///
/// Records are serialized into an in-memory buffer, CRC-checksummed, and then
/// written to the underlying file in a single `write_all` call. When `sync` is
/// `true`, every append is followed by `sync_all()` (fsync) to guarantee the
/// record is durable on disk before the call returns.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Bytes in the file, including what this writer appended. Always the
    /// end of the last complete frame.
    len: u64,
    /// A failed append could not be rolled back; the file may end in garbage.
    poisoned: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sync,
            len,
            poisoned: false,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the WAL file.
    ///
    /// Layout:
    /// [record_len: u32 LE][crc32: u32 LE][body bytes...]
    ///
    /// If the write (or the fsync) fails, the file is cut back to its length
    /// before the call, so a later append never lands after a partial frame.
    /// When that truncation fails too the writer is [poisoned](Self::is_poisoned).
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        // Reuse the internal buffer: clear but keep the allocation
        self.buf.clear();

        // Reserve 8 bytes for the frame header (record_len + crc), filled later
        self.buf.extend_from_slice(&[0u8; 8]);

        match record {
            WalRecord::Put { seq, key, value } => {
                self.buf.write_u64::<LittleEndian>(*seq)?;
                self.buf.write_u8(OP_PUT)?;
                self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u32::<LittleEndian>(len_u32(value.len())?)?;
                self.buf.extend_from_slice(value);
            }
            WalRecord::Del { seq, key } => {
                self.buf.write_u64::<LittleEndian>(*seq)?;
                self.buf.write_u8(OP_DEL)?;
                self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                self.buf.extend_from_slice(key);
            }
        }

        let body = &self.buf[8..];

        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        // record_len = body.len() + 4 (CRC), must fit in u32
        let record_len = len_u32(body.len() + 4)?;

        self.buf[0..4].copy_from_slice(&record_len.to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        if let Err(e) = self.write_frame() {
            self.rollback();
            return Err(e.into());
        }
        self.len += self.buf.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self) -> io::Result<()> {
        // Single write call for the entire frame
        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            tracing::error!(len = self.len, error = %e, "failed to roll back partial WAL append");
            self.poisoned = true;
        }
    }

    /// Whether a failed append left bytes this writer could not remove.
    /// Nothing more should be appended to this file.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Forces all buffered data to be written to disk via `sync_all()`.
    ///
    /// Useful when `sync` is `false` (batched mode) and the caller wants to
    /// ensure durability at a specific point, e.g. before rotating.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn len_u32(len: usize) -> Result<u32, WalError> {
    u32::try_from(len).map_err(|_| {
        WalError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "WAL record too large (exceeds u32::MAX bytes)",
        ))
    })
}
