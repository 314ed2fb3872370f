use bloom::BloomFilter;
use memtable::ValueEntry;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::format::{read_key, read_record, Footer, FOOTER_BYTES};
use crate::{SSTableIterator, SstError};

/// Reads an SSTable file for point lookups and scans.
///
/// [`open`](SSTableReader::open) loads the footer, bloom filter, sparse index
/// and key range into memory; the data section is only touched by lookups.
///
/// A persistent file handle is kept open for the lifetime of the reader,
/// wrapped in a `Mutex` so that `get` can be called through a shared `&self`
/// reference. The lock is held only while the candidate block is read.
pub struct SSTableReader {
    path: PathBuf,
    footer: Footer,
    file_size: u64,
    bloom: BloomFilter,
    /// First key of every block and the block's byte offset, ascending.
    index: Vec<(Vec<u8>, u64)>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    file: Mutex<BufReader<File>>,
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("entries", &self.footer.entry_count)
            .field("max_seq", &self.footer.max_seq)
            .field("index_entries", &self.index.len())
            .finish()
    }
}

impl SSTableReader {
    /// Opens an SSTable and loads everything but the data section.
    ///
    /// # Validation
    ///
    /// - footer magic and section ordering,
    /// - bloom filter parameters and exact section length,
    /// - sparse index offsets ascending and inside the data section,
    /// - min/max key present and ordered.
    ///
    /// Any failure is reported as [`SstError::Corrupt`]; an unreadable file
    /// as [`SstError::Io`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SstError> {
        let path = path.as_ref().to_path_buf();
        let f = File::open(&path)?;
        let file_size = f.metadata()?.len();

        Self::load(path, f, file_size).map_err(SstError::from_section_read)
    }

    fn load(path: PathBuf, mut f: File, file_size: u64) -> Result<Self, SstError> {
        let footer = Footer::read_from(&mut f, file_size)?;

        // BLOOM
        f.seek(SeekFrom::Start(footer.bloom_offset))?;
        let mut section = vec![0u8; (footer.index_offset - footer.bloom_offset) as usize];
        f.read_exact(&mut section)?;
        let mut cursor = section.as_slice();
        let bloom = BloomFilter::read_from(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(SstError::Corrupt(format!(
                "{} trailing bytes after bloom filter",
                cursor.len()
            )));
        }

        // SPARSE INDEX
        let mut section = vec![0u8; (footer.meta_offset - footer.index_offset) as usize];
        f.read_exact(&mut section)?;
        let mut cursor = section.as_slice();
        let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
        while !cursor.is_empty() {
            let key = read_key(&mut cursor)?;
            let mut offset = [0u8; 8];
            cursor.read_exact(&mut offset)?;
            let offset = u64::from_le_bytes(offset);

            if offset >= footer.bloom_offset {
                return Err(SstError::Corrupt(format!(
                    "index offset {} points past the data section",
                    offset
                )));
            }
            if let Some((prev_key, prev_off)) = index.last() {
                if offset <= *prev_off || key <= *prev_key {
                    return Err(SstError::Corrupt("index entries out of order".to_string()));
                }
            }
            index.push((key, offset));
        }
        match index.first() {
            Some((_, 0)) => {}
            _ => return Err(SstError::Corrupt("index does not start at offset 0".to_string())),
        }

        // META
        let mut section = vec![0u8; (file_size - FOOTER_BYTES - footer.meta_offset) as usize];
        f.read_exact(&mut section)?;
        let mut cursor = section.as_slice();
        let min_key = read_key(&mut cursor)?;
        let max_key = read_key(&mut cursor)?;
        if min_key > max_key || index[0].0 != min_key {
            return Err(SstError::Corrupt("inconsistent key range".to_string()));
        }

        Ok(Self {
            path,
            footer,
            file_size,
            bloom,
            index,
            min_key,
            max_key,
            file: Mutex::new(BufReader::new(f)),
        })
    }

    /// Point lookup for a single key.
    ///
    /// Keys outside `[min_key, max_key]` and keys the bloom filter rejects
    /// return `Ok(None)` without any disk I/O. Otherwise the one block that
    /// could hold the key is read and scanned.
    ///
    /// Returns `Ok(Some(entry))` if the key exists in this SSTable (the entry
    /// may be a tombstone with `value: None`).
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>, SstError> {
        if key < self.min_key.as_slice() || key > self.max_key.as_slice() {
            return Ok(None);
        }
        if !self.bloom.may_contain(key) {
            return Ok(None);
        }

        let (start, end) = self.block_bounds(key);
        let mut block = vec![0u8; (end - start) as usize];
        {
            let mut f = self.file.lock();
            f.seek(SeekFrom::Start(start))?;
            f.read_exact(&mut block)
                .map_err(|e| SstError::from_section_read(e.into()))?;
        }

        let mut cursor = block.as_slice();
        let mut offset = start;
        while !cursor.is_empty() {
            let record =
                read_record(&mut cursor, offset).map_err(SstError::from_section_read)?;
            match record.key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => offset += record.encoded_len,
                std::cmp::Ordering::Equal => return Ok(Some(record.entry)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Byte range of the block whose first key is the greatest one `<= key`.
    /// Callers guarantee `key >= min_key`, so such a block exists.
    fn block_bounds(&self, key: &[u8]) -> (u64, u64) {
        let idx = self
            .index
            .partition_point(|(k, _)| k.as_slice() <= key)
            .max(1);
        let start = self.index[idx - 1].1;
        let end = self
            .index
            .get(idx)
            .map_or(self.footer.bloom_offset, |(_, off)| *off);
        (start, end)
    }

    /// Iterates every record in key order on a separate file handle.
    pub fn iter(&self) -> Result<SSTableIterator, SstError> {
        SSTableIterator::open(&self.path, 0, self.footer.bloom_offset, None)
    }

    /// Iterates records with keys `>= start` in key order, starting from the
    /// block that may contain `start`.
    pub fn iter_from(&self, start: &[u8]) -> Result<SSTableIterator, SstError> {
        if start <= self.min_key.as_slice() {
            return self.iter();
        }
        let (block_start, _) = self.block_bounds(start);
        SSTableIterator::open(
            &self.path,
            block_start,
            self.footer.bloom_offset,
            Some(start.to_vec()),
        )
    }

    /// Bloom filter check only.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.may_contain(key)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest sequence number stored in the table.
    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    /// Number of records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.footer.entry_count as usize
    }

    /// Always `false` for a table that opened successfully.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of sparse-index entries (blocks).
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }
}
