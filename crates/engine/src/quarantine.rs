//! Setting aside SSTables that fail validation.
//!
//! A table can fail at open (bad footer, index or bloom section) or later,
//! when a lookup, scan or compaction reads a damaged record. Either way it
//! leaves the manifest and the table lists, and its file is renamed with a
//! `.corrupt` suffix so it can be inspected.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use sstable::{Entry, SstError};

use crate::error::EngineError;
use crate::table::Table;
use crate::EngineInner;

/// Suffix given to a table file that failed validation.
pub(crate) const QUARANTINE_SUFFIX: &str = ".corrupt";

/// Renames `path` to `<path>.corrupt` and returns the new path.
pub(crate) fn quarantine_file(path: &Path) -> std::io::Result<PathBuf> {
    let mut target = path.to_path_buf().into_os_string();
    target.push(QUARANTINE_SUFFIX);
    let target = PathBuf::from(target);
    fs::rename(path, &target)?;
    Ok(target)
}

/// Remembers which tables yielded [`SstError::Corrupt`] through iterators
/// that were merged together, where the error alone does not say.
#[derive(Clone, Default)]
pub(crate) struct CorruptTables(Arc<Mutex<Vec<Arc<Table>>>>);

impl CorruptTables {
    pub(crate) fn track<I>(
        &self,
        table: &Arc<Table>,
        iter: I,
    ) -> impl Iterator<Item = Result<Entry, SstError>>
    where
        I: Iterator<Item = Result<Entry, SstError>>,
    {
        let seen = self.clone();
        let table = Arc::clone(table);
        iter.inspect(move |item| {
            if let Err(SstError::Corrupt(_)) = item {
                seen.0.lock().push(Arc::clone(&table));
            }
        })
    }

    pub(crate) fn take(&self) -> Vec<Arc<Table>> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl EngineInner {
    /// Quarantines `table` if `error` is corruption, then hands the error
    /// back for the caller to return.
    pub(crate) fn table_failed(&self, table: &Arc<Table>, error: SstError) -> EngineError {
        if let SstError::Corrupt(_) = error {
            self.quarantine(table, &error);
        }
        error.into()
    }

    /// Quarantines every table `seen` caught failing.
    pub(crate) fn quarantine_tracked(&self, seen: &CorruptTables, error: &SstError) {
        for table in seen.take() {
            self.quarantine(&table, error);
        }
    }

    /// Removes `table` from the manifest and the table lists and renames its
    /// file. A table already retired by compaction or by an earlier call is
    /// left alone. Handles held by in-flight readers stay valid.
    pub(crate) fn quarantine(&self, table: &Arc<Table>, error: &SstError) {
        let mut manifest = self.manifest.lock();
        if !manifest.contains(table.name()) {
            return;
        }

        let before = manifest.clone();
        manifest.remove_files(&[table.name().to_string()]);
        if let Err(e) = manifest.save() {
            *manifest = before;
            tracing::error!(
                table = %table.name(),
                error = %e,
                "failed to drop corrupt sstable from manifest"
            );
            return;
        }

        let path = table.reader().path();
        let kept_at = match quarantine_file(path) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(table = %table.name(), error = %e, "failed to rename corrupt sstable");
                path.to_path_buf()
            }
        };

        {
            let mut state = self.state.write();
            state.l0.retain(|t| !Arc::ptr_eq(t, table));
            state.l1.retain(|t| !Arc::ptr_eq(t, table));
            state.quarantined.push(kept_at);
        }

        tracing::error!(table = %table.name(), error = %error, "quarantined corrupt sstable");
    }
}
