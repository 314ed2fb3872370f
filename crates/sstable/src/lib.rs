//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the Strata storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are *write-once,
//! read-many*: once created they are never modified, only replaced during
//! compaction.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted records, one per key)                    │
//! │                                                               │
//! │ crc32 (u32) | key_len (u32) | key | seq (u64)                 │
//! │ present (u8) | [val_len (u32) | val]                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (serialized BloomFilter)                        │
//! │                                                               │
//! │ num_bits (u64) | num_hashes (u32) | bits_len (u32) | bits     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ SPARSE INDEX (first key of every block of N records)          │
//! │                                                               │
//! │ key_len (u32) | key | data_offset (u64)                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ META                                                          │
//! │                                                               │
//! │ min_key_len (u32) | min_key | max_key_len (u32) | max_key     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 44 bytes)                                 │
//! │                                                               │
//! │ entry_count | max_seq | bloom_offset | index_offset           │
//! │ meta_offset (all u64 LE) | magic (u32 LE) "STRT"              │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A point lookup checks the key range and the bloom filter from memory,
//! binary-searches the sparse index, then reads and scans one block.

mod format;
mod iter;
mod merge;
mod reader;
mod writer;

pub use format::{Footer, FOOTER_BYTES, SSTABLE_MAGIC};
pub use iter::SSTableIterator;
pub use merge::MergeIterator;
pub use reader::SSTableReader;
pub use writer::{SSTableWriter, WriterOptions};

use std::io;
use thiserror::Error;

/// Largest key accepted by the writer and the reader (64 KiB).
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Largest value accepted by the writer and the reader (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Errors produced while writing or reading SSTables.
#[derive(Debug, Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file failed validation: bad footer, checksum mismatch, truncated
    /// section, or out-of-range lengths.
    #[error("corrupt sstable: {0}")]
    Corrupt(String),

    #[error("refusing to write an empty SSTable")]
    Empty,

    /// Entries handed to the writer were unsorted or exceeded size limits.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SstError {
    /// Running out of bytes inside a section means the file is damaged, not
    /// that the disk failed.
    pub(crate) fn from_section_read(err: SstError) -> SstError {
        match err {
            SstError::Io(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                SstError::Corrupt(e.to_string())
            }
            other => other,
        }
    }
}

/// One decoded SSTable entry.
pub type Entry = (Vec<u8>, memtable::ValueEntry);

#[cfg(test)]
mod tests;
