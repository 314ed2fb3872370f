//! # WAL - Write-Ahead Log
//!
//! Provides crash-safe durability for the Strata storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding in-memory update. On
//! restart the WAL is replayed to reconstruct the memtable, guaranteeing that
//! no acknowledged write is lost.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body (Put): `[seq: u64][op=0: u8][key_len: u32][key][val_len: u32][value]`
//! Body (Del): `[seq: u64][op=1: u8][key_len: u32][key]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Segments
//!
//! The log is a sequence of files `wal-000001.log`, `wal-000002.log`, ...
//! in one directory ([`Wal`]). A segment is rotated when it would exceed its
//! size limit and when the engine flushes its memtable; segments that only
//! hold flushed data are deleted with [`Wal::purge_before`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalWriter, WalReader, WalRecord};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append(&WalRecord::Put {
//!     seq: 1,
//!     key: b"hello".to_vec(),
//!     value: b"world".to_vec(),
//! }).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

mod reader;
mod segment;
mod writer;

pub use reader::{ReplaySummary, WalReader};
pub use segment::{list_segments, segment_path, RecoveryReport, Wal, WalOptions};
pub use writer::WalWriter;

use std::io;
use thiserror::Error;

/// Op code of a put record.
pub(crate) const OP_PUT: u8 = 0;
/// Op code of a delete record.
pub(crate) const OP_DEL: u8 = 1;

/// Frame header: `record_len` + `crc32`.
pub(crate) const FRAME_HEADER_SIZE: u64 = 8;

/// Upper bound on `record_len`; anything larger is treated as corruption.
pub(crate) const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single WAL record representing either a key-value insertion or a deletion.
///
/// Each record carries the engine-assigned **sequence number**, which is
/// strictly increasing across the whole life of a data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// A key-value insertion.
    Put {
        seq: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// A key deletion (tombstone).
    Del { seq: u64, key: Vec<u8> },
}

impl WalRecord {
    pub fn seq(&self) -> u64 {
        match self {
            WalRecord::Put { seq, .. } | WalRecord::Del { seq, .. } => *seq,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WalRecord::Put { key, .. } | WalRecord::Del { key, .. } => key,
        }
    }

    /// Size of the full frame (header included) this record encodes to.
    pub fn encoded_len(&self) -> u64 {
        // seq + op + key_len + key
        let mut body = 8 + 1 + 4 + self.key().len() as u64;
        if let WalRecord::Put { value, .. } = self {
            body += 4 + value.len() as u64;
        }
        FRAME_HEADER_SIZE + body
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed validation (bad length, CRC mismatch or unknown op
    /// code) and a valid record follows it. `offset` is the start of the bad
    /// frame.
    #[error("corrupt record at offset {offset}")]
    Corrupt { offset: u64 },
}
