//! SSTable binary format: footer and data-record codecs.
//!
//! ## Footer (44 bytes, always last)
//!
//! ```text
//! [entry_count: u64][max_seq: u64][bloom_offset: u64][index_offset: u64]
//! [meta_offset: u64][magic: u32 = "STRT"]
//! ```
//!
//! ## Data record
//!
//! ```text
//! [crc32: u32][key_len: u32][key][seq: u64][present: u8][val_len: u32][val]
//! ```
//!
//! `val_len` and `val` are only written when `present == 1`. The CRC covers
//! everything after itself.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::{SstError, MAX_KEY_BYTES, MAX_VALUE_BYTES};

/// Magic number identifying Strata SSTables (ASCII "STRT").
pub const SSTABLE_MAGIC: u32 = 0x5354_5254;

/// Size of the footer in bytes: five `u64` fields plus the `u32` magic.
pub const FOOTER_BYTES: u64 = 5 * 8 + 4;

const PRESENT: u8 = 1;
const TOMBSTONE: u8 = 0;

/// Parsed SSTable footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub entry_count: u64,
    pub max_seq: u64,
    pub bloom_offset: u64,
    pub index_offset: u64,
    pub meta_offset: u64,
}

impl Footer {
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.max_seq)?;
        w.write_u64::<LittleEndian>(self.bloom_offset)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_u64::<LittleEndian>(self.meta_offset)?;
        w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
        Ok(())
    }

    /// Reads and validates the footer at the end of a file of `filesize`
    /// bytes. Section offsets must be ordered and lie before the footer.
    pub fn read_from<R: Read + Seek>(r: &mut R, filesize: u64) -> Result<Self, SstError> {
        if filesize < FOOTER_BYTES {
            return Err(SstError::Corrupt(format!(
                "file too small for footer: {} bytes",
                filesize
            )));
        }

        r.seek(SeekFrom::Start(filesize - FOOTER_BYTES))?;
        let footer = Footer {
            entry_count: r.read_u64::<LittleEndian>()?,
            max_seq: r.read_u64::<LittleEndian>()?,
            bloom_offset: r.read_u64::<LittleEndian>()?,
            index_offset: r.read_u64::<LittleEndian>()?,
            meta_offset: r.read_u64::<LittleEndian>()?,
        };
        let magic = r.read_u32::<LittleEndian>()?;

        if magic != SSTABLE_MAGIC {
            return Err(SstError::Corrupt(format!("bad magic: {:#x}", magic)));
        }
        let footer_start = filesize - FOOTER_BYTES;
        let ordered = footer.bloom_offset <= footer.index_offset
            && footer.index_offset <= footer.meta_offset
            && footer.meta_offset <= footer_start;
        if !ordered {
            return Err(SstError::Corrupt(format!(
                "section offsets out of order: bloom {} index {} meta {} footer {}",
                footer.bloom_offset, footer.index_offset, footer.meta_offset, footer_start
            )));
        }
        if footer.entry_count == 0 {
            return Err(SstError::Corrupt("footer reports zero entries".to_string()));
        }
        Ok(footer)
    }
}

/// Encodes one data record (CRC prefix included) into `buf`, replacing its
/// contents.
pub(crate) fn encode_record(buf: &mut Vec<u8>, key: &[u8], entry: &ValueEntry) {
    buf.clear();
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(&entry.seq.to_le_bytes());
    match &entry.value {
        Some(v) => {
            buf.push(PRESENT);
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(v);
        }
        None => buf.push(TOMBSTONE),
    }

    let mut hasher = Crc32::new();
    hasher.update(&buf[4..]);
    let crc = hasher.finalize();
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
}

/// A decoded data record and the number of bytes it occupied.
pub(crate) struct Record {
    pub key: Vec<u8>,
    pub entry: ValueEntry,
    pub encoded_len: u64,
}

/// Decodes and CRC-checks one data record. `offset` is only used for error
/// messages.
pub(crate) fn read_record<R: Read>(r: &mut R, offset: u64) -> Result<Record, SstError> {
    let stored_crc = r.read_u32::<LittleEndian>()?;
    let mut hasher = Crc32::new();

    let key_len = r.read_u32::<LittleEndian>()? as usize;
    if key_len > MAX_KEY_BYTES {
        return Err(SstError::Corrupt(format!(
            "key_len {} exceeds maximum {} at offset {}",
            key_len, MAX_KEY_BYTES, offset
        )));
    }
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let seq = r.read_u64::<LittleEndian>()?;
    let present = r.read_u8()?;

    hasher.update(&(key_len as u32).to_le_bytes());
    hasher.update(&key);
    hasher.update(&seq.to_le_bytes());
    hasher.update(&[present]);

    let mut encoded_len = 4 + 4 + key_len as u64 + 8 + 1;
    let value = match present {
        PRESENT => {
            let val_len = r.read_u32::<LittleEndian>()? as usize;
            if val_len > MAX_VALUE_BYTES {
                return Err(SstError::Corrupt(format!(
                    "val_len {} exceeds maximum {} at offset {}",
                    val_len, MAX_VALUE_BYTES, offset
                )));
            }
            let mut val = vec![0u8; val_len];
            r.read_exact(&mut val)?;
            hasher.update(&(val_len as u32).to_le_bytes());
            hasher.update(&val);
            encoded_len += 4 + val_len as u64;
            Some(val)
        }
        TOMBSTONE => None,
        other => {
            return Err(SstError::Corrupt(format!(
                "unknown record kind {} at offset {}",
                other, offset
            )))
        }
    };

    let actual_crc = hasher.finalize();
    if actual_crc != stored_crc {
        return Err(SstError::Corrupt(format!(
            "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x}",
            offset, stored_crc, actual_crc
        )));
    }

    Ok(Record {
        key,
        entry: ValueEntry { seq, value },
        encoded_len,
    })
}

/// Writes a length-prefixed byte string.
pub(crate) fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

/// Reads a length-prefixed key, rejecting absurd lengths.
pub(crate) fn read_key<R: Read>(r: &mut R) -> Result<Vec<u8>, SstError> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_KEY_BYTES {
        return Err(SstError::Corrupt(format!(
            "key_len {} exceeds maximum {}",
            len, MAX_KEY_BYTES
        )));
    }
    let mut key = vec![0u8; len];
    r.read_exact(&mut key)?;
    Ok(key)
}
