//! Shared handle to one open SSTable.
//!
//! The engine's table lists hold `Arc<Table>`. Readers clone the `Arc`s they
//! need and drop the state lock before touching disk. When compaction retires
//! a table it only marks it obsolete; the file is removed when the last
//! handle goes away, so an in-flight lookup or scan never loses its file.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use sstable::{SSTableReader, SstError};

/// File name of the table with number `id`.
pub(crate) fn table_filename(id: u64) -> String {
    format!("sst-{:010}.sst", id)
}

/// Parses the number out of `sst-<n>.sst`.
pub(crate) fn parse_table_id(filename: &str) -> Option<u64> {
    filename
        .strip_prefix("sst-")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}

/// Removes the output of a flush or compaction that did not complete.
pub(crate) fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(file = %path.display(), "removed partial sstable"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            file = %path.display(),
            error = %e,
            "failed to remove partial sstable"
        ),
    }
}

pub(crate) struct Table {
    name: String,
    reader: SSTableReader,
    obsolete: AtomicBool,
}

impl Table {
    pub(crate) fn open(dir: &Path, name: &str) -> Result<Self, SstError> {
        if parse_table_id(name).is_none() {
            return Err(SstError::InvalidInput(format!("bad table name '{}'", name)));
        }
        let reader = SSTableReader::open(dir.join(name))?;
        Ok(Self {
            name: name.to_string(),
            reader,
            obsolete: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn reader(&self) -> &SSTableReader {
        &self.reader
    }

    /// Schedules the file for deletion once the last handle is dropped.
    pub(crate) fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if !self.obsolete.load(Ordering::Acquire) {
            return;
        }
        match fs::remove_file(self.reader.path()) {
            Ok(()) => tracing::debug!(table = %self.name, "removed obsolete sstable"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                table = %self.name,
                error = %e,
                "failed to remove obsolete sstable"
            ),
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("entries", &self.reader.len())
            .field("max_seq", &self.reader.max_seq())
            .finish()
    }
}
