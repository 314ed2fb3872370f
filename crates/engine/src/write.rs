//! Write path: `put()`, `delete()` and `flush()`.
//!
//! Every mutation is appended to the WAL and then applied to the memtable,
//! both under the mutation lock. If the WAL append fails the memtable is not
//! touched. When the memtable reaches `memtable_max_size` it is flushed to a
//! new L0 SSTable.

use std::sync::Arc;

use memtable::Memtable;
use sstable::{SSTableWriter, MAX_KEY_BYTES, MAX_VALUE_BYTES};
use wal::WalRecord;

use crate::error::{EngineError, Result};
use crate::manifest::Level;
use crate::table::{discard_partial, table_filename, Table};
use crate::{Engine, EngineInner};

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidArgument("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(EngineError::InvalidArgument(format!(
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_BYTES
        )));
    }
    Ok(())
}

impl EngineInner {
    /// Appends `record` to the WAL and applies it to the memtable. Returns
    /// whether the memtable has reached the flush threshold.
    fn apply_write(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<bool> {
        let mut writer = self.writer.lock();
        let seq = writer
            .seq
            .checked_add(1)
            .ok_or(EngineError::SequenceOverflow)?;
        let wal = writer.wal.as_mut().ok_or(EngineError::Closed)?;

        let record = match value {
            Some(value) => WalRecord::Put { seq, key, value },
            None => WalRecord::Del { seq, key },
        };
        wal.append(&record)?;
        writer.seq = seq;

        let mut state = self.state.write();
        match record {
            WalRecord::Put { key, value, .. } => state.mem.put(key, value, seq),
            WalRecord::Del { key, .. } => state.mem.delete(key, seq),
        }
        Ok(state.mem.approx_size() >= self.config.memtable_max_size)
    }

    pub(crate) fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        validate_key(&key)?;
        if value.len() > MAX_VALUE_BYTES {
            return Err(EngineError::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                value.len(),
                MAX_VALUE_BYTES
            )));
        }
        if self.apply_write(key, Some(value))? {
            self.flush(false)?;
        }
        Ok(())
    }

    pub(crate) fn delete(&self, key: Vec<u8>) -> Result<()> {
        validate_key(&key)?;
        if self.apply_write(key, None)? {
            self.flush(false)?;
        }
        Ok(())
    }

    /// Flushes the memtable to a new L0 SSTable.
    ///
    /// # Steps
    ///
    /// 1. Under the mutation lock: rotate the WAL and swap the memtable for an
    ///    empty one. The old memtable becomes `frozen` and stays readable.
    /// 2. Without engine locks: write the frozen memtable to
    ///    `sst-<n>.sst` (temp file + rename) and open it.
    /// 3. Commit the table to the manifest, then publish it as the newest L0
    ///    table and drop `frozen`.
    /// 4. Purge the WAL segments whose records are now in the table.
    ///
    /// If step 2 or 3 fails, the frozen entries are merged back into the
    /// memtable and the WAL is left intact.
    ///
    /// With `force == false` the flush is skipped unless the memtable is still
    /// over the threshold once the flush lock is held.
    ///
    /// Returns the number of records written (0 if there was nothing to do).
    pub(crate) fn flush(&self, force: bool) -> Result<usize> {
        let _flush_guard = self.flush_lock.lock();

        // 1. freeze
        let (frozen, first_live_segment) = {
            let mut writer = self.writer.lock();
            let wal = writer.wal.as_mut().ok_or(EngineError::Closed)?;
            {
                let state = self.state.read();
                let over = state.mem.approx_size() >= self.config.memtable_max_size;
                if state.mem.is_empty() || (!force && !over) {
                    return Ok(0);
                }
            }
            let segment = wal.rotate()?;

            let mut state = self.state.write();
            let frozen = Arc::new(std::mem::take(&mut state.mem));
            state.frozen = Some(Arc::clone(&frozen));
            (frozen, segment)
        };

        // 2. write + open
        let id = self.allocate_file_id();
        let name = table_filename(id);
        let path = self.dir().join(&name);

        let written = SSTableWriter::write_from_memtable(&path, &frozen, self.writer_options())
            .map_err(EngineError::from)
            .and_then(|n| Ok((n, Table::open(self.dir(), &name)?)));
        let (count, table) = match written {
            Ok(ok) => ok,
            Err(e) => {
                discard_partial(&path);
                self.unfreeze(&frozen);
                tracing::error!(table = %name, error = %e, "flush failed");
                return Err(e);
            }
        };

        // 3. commit + publish
        {
            let mut manifest = self.manifest.lock();
            manifest.add(name.clone(), Level::L0);
            if let Err(e) = manifest.save() {
                manifest.remove_files(&[name.clone()]);
                drop(manifest);
                table.mark_obsolete();
                drop(table);
                self.unfreeze(&frozen);
                tracing::error!(table = %name, error = %e, "flush failed to commit manifest");
                return Err(e);
            }

            let mut state = self.state.write();
            state.l0.insert(0, Arc::new(table));
            state.frozen = None;
        }

        // 4. reclaim WAL
        let purged = {
            let mut writer = self.writer.lock();
            match writer.wal.as_mut() {
                Some(wal) => wal.purge_before(first_live_segment)?,
                None => 0,
            }
        };

        tracing::info!(
            table = %name,
            entries = count,
            wal_segments_purged = purged,
            "flushed memtable"
        );
        Ok(count)
    }

    /// Puts the entries of a failed flush back into the live memtable. Entries
    /// written since the freeze carry higher sequence numbers and win.
    fn unfreeze(&self, frozen: &Memtable) {
        let mut state = self.state.write();
        for (key, entry) in frozen.iter() {
            state.mem.apply(key.to_vec(), entry.clone());
        }
        state.frozen = None;
    }
}

impl Engine {
    /// Inserts or overwrites `key`.
    ///
    /// The record is durable in the WAL before this returns. May trigger a
    /// flush; a flush failure is returned even though the write itself is
    /// already durable.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidArgument`] for an empty or oversized key or an
    ///   oversized value.
    /// - [`EngineError::Closed`] after [`close`](Engine::close).
    /// - WAL or flush I/O failures.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.inner.put(key.into(), value.into())
    }

    /// Deletes `key` by writing a tombstone. Deleting a missing key is not an
    /// error.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        self.inner.delete(key.into())
    }

    /// Writes the memtable to a new SSTable even if it is under the
    /// threshold. A no-op (returning `Ok(0)`) for an empty memtable.
    pub fn flush(&self) -> Result<usize> {
        self.inner.flush(true)
    }
}
