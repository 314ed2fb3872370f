use bloom::BloomFilter;
use memtable::{Memtable, ValueEntry};
use std::fs::{self, rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::format::{encode_record, write_bytes, Footer};
use crate::{SstError, MAX_KEY_BYTES, MAX_VALUE_BYTES};

/// Tunables for a single SSTable.
#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    /// Target false-positive rate of the embedded bloom filter.
    pub bloom_false_positive_rate: f64,
    /// One sparse-index entry is written per this many records.
    pub index_interval: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            bloom_false_positive_rate: 0.01,
            index_interval: 16,
        }
    }
}

/// Writes sorted entries to disk as an immutable SSTable file.
///
/// The write is crash-safe: data is first written to `<path>.sst.tmp`,
/// fsynced, and then atomically renamed to the final path. A crash mid-write
/// leaves only the temp file behind, which the engine removes on open.
pub struct SSTableWriter;

impl SSTableWriter {
    /// Flushes `mem` to a new SSTable file at `path`. Tombstones are written
    /// as first-class records. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// [`SstError::Empty`] for an empty memtable, otherwise any I/O failure.
    pub fn write_from_memtable(
        path: &Path,
        mem: &Memtable,
        opts: WriterOptions,
    ) -> Result<usize, SstError> {
        if mem.is_empty() {
            return Err(SstError::Empty);
        }
        let iter = mem.iter().map(|(k, v)| Ok((k.to_vec(), v.clone())));
        Self::write_internal(path, mem.len(), opts, iter)
    }

    /// Writes an SSTable from a stream of `(key, ValueEntry)` pairs.
    ///
    /// This is the compaction entry point: entries are consumed one at a time,
    /// so memory stays proportional to the bloom filter and sparse index.
    ///
    /// * `expected_count` sizes the bloom filter. Over-estimating is safe;
    ///   under-estimating raises the false-positive rate.
    /// * `iter` must yield strictly ascending keys. The first error it yields
    ///   aborts the write and removes the temp file.
    pub fn write_from_iterator<I>(
        path: &Path,
        expected_count: usize,
        opts: WriterOptions,
        iter: I,
    ) -> Result<usize, SstError>
    where
        I: IntoIterator<Item = Result<(Vec<u8>, ValueEntry), SstError>>,
    {
        Self::write_internal(path, expected_count, opts, iter)
    }

    fn write_internal<I>(
        path: &Path,
        expected_count: usize,
        opts: WriterOptions,
        iter: I,
    ) -> Result<usize, SstError>
    where
        I: IntoIterator<Item = Result<(Vec<u8>, ValueEntry), SstError>>,
    {
        let tmp_path = tmp_path_for(path);
        let result = write_file(&tmp_path, expected_count, opts, iter.into_iter());
        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        if let Err(e) = rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // Fsync the parent directory so the rename survives a crash.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(written)
    }
}

/// Temp file used while `path` is being written.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    path.with_extension("sst.tmp")
}

fn write_file<I>(
    tmp_path: &Path,
    expected_count: usize,
    opts: WriterOptions,
    iter: I,
) -> Result<usize, SstError>
where
    I: Iterator<Item = Result<(Vec<u8>, ValueEntry), SstError>>,
{
    let interval = opts.index_interval.max(1);
    let raw_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;
    let mut file = BufWriter::new(raw_file);

    let mut bloom = BloomFilter::new(expected_count, opts.bloom_false_positive_rate);
    let mut index: Vec<(Vec<u8>, u64)> = Vec::new();
    let mut offset: u64 = 0;
    let mut count: usize = 0;
    let mut max_seq: u64 = 0;
    let mut min_key: Option<Vec<u8>> = None;
    let mut prev_key: Option<Vec<u8>> = None;
    let mut record_buf: Vec<u8> = Vec::with_capacity(256);

    // DATA
    for item in iter {
        let (key, entry) = item?;

        if key.len() > MAX_KEY_BYTES {
            return Err(SstError::InvalidInput(format!(
                "key of {} bytes exceeds maximum {}",
                key.len(),
                MAX_KEY_BYTES
            )));
        }
        if entry.value.as_ref().map_or(0, Vec::len) > MAX_VALUE_BYTES {
            return Err(SstError::InvalidInput(format!(
                "value exceeds maximum {} bytes",
                MAX_VALUE_BYTES
            )));
        }
        if let Some(prev) = &prev_key {
            if key <= *prev {
                return Err(SstError::InvalidInput(
                    "keys must be strictly ascending".to_string(),
                ));
            }
        }

        encode_record(&mut record_buf, &key, &entry);
        file.write_all(&record_buf)?;

        if count % interval == 0 {
            index.push((key.clone(), offset));
        }
        bloom.insert(&key);
        max_seq = max_seq.max(entry.seq);
        offset += record_buf.len() as u64;
        count += 1;

        if min_key.is_none() {
            min_key = Some(key.clone());
        }
        prev_key = Some(key);
    }

    let (min_key, max_key) = match (min_key, prev_key) {
        (Some(min), Some(max)) => (min, max),
        _ => return Err(SstError::Empty),
    };

    // BLOOM
    let bloom_offset = offset;
    bloom.write_to(&mut file)?;
    offset += bloom.serialized_size() as u64;

    // SPARSE INDEX
    let index_offset = offset;
    for (key, data_offset) in &index {
        write_bytes(&mut file, key)?;
        file.write_all(&data_offset.to_le_bytes())?;
        offset += 4 + key.len() as u64 + 8;
    }

    // META
    let meta_offset = offset;
    write_bytes(&mut file, &min_key)?;
    write_bytes(&mut file, &max_key)?;

    Footer {
        entry_count: count as u64,
        max_seq,
        bloom_offset,
        index_offset,
        meta_offset,
    }
    .write_to(&mut file)?;

    file.flush()?;
    file.into_inner()
        .map_err(|e| SstError::Io(e.into_error()))?
        .sync_all()?;

    Ok(count)
}
