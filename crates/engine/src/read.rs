//! Read path: `get()` and `scan()`.
//!
//! Point lookups check the memtable first (freshest data), then the frozen
//! memtable of an in-flight flush, then L0 SSTables newest first (they may
//! overlap), then L1. The first match wins; tombstones shadow older values.
//!
//! Range scans merge every source with [`MergeIterator`], keep the entry with
//! the highest sequence number per key and drop tombstones.
//!
//! A table that returns corrupt data is quarantined; the call that found it
//! still fails, later calls no longer see the table.

use std::ops::Bound;
use std::sync::Arc;

use memtable::Memtable;
use sstable::{Entry, MergeIterator, SstError};

use crate::error::Result;
use crate::quarantine::CorruptTables;
use crate::table::Table;
use crate::{Engine, EngineInner, State};

type Source = Box<dyn Iterator<Item = std::result::Result<Entry, SstError>>>;

/// Handles cloned out of the state lock; lookups run against these.
struct Snapshot {
    frozen: Option<Arc<Memtable>>,
    tables: Vec<Arc<Table>>,
}

impl Snapshot {
    fn capture(state: &State) -> Self {
        Self {
            frozen: state.frozen.clone(),
            tables: state.l0.iter().chain(state.l1.iter()).cloned().collect(),
        }
    }
}

impl EngineInner {
    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;

        let snapshot = {
            let state = self.state.read();
            if let Some(entry) = state.mem.get_entry(key) {
                return Ok(entry.value.clone());
            }
            Snapshot::capture(&state)
        };

        if let Some(frozen) = &snapshot.frozen {
            if let Some(entry) = frozen.get_entry(key) {
                return Ok(entry.value.clone());
            }
        }

        for table in &snapshot.tables {
            match table.reader().get(key) {
                Ok(Some(entry)) => return Ok(entry.value),
                Ok(None) => {}
                Err(e) => return Err(self.table_failed(table, e)),
            }
        }

        Ok(None)
    }

    pub(crate) fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        if !start.is_empty() && !end.is_empty() && start >= end {
            return Ok(Vec::new());
        }

        let lower = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start)
        };
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };

        let (mem_entries, snapshot) = {
            let state = self.state.read();
            (
                collect_range(&state.mem, lower, upper),
                Snapshot::capture(&state),
            )
        };

        // Newest sources first so that equal sequence numbers resolve to them.
        let mut sources: Vec<Source> = vec![Box::new(
            mem_entries.into_iter().map(Ok::<Entry, SstError>),
        )];
        if let Some(frozen) = &snapshot.frozen {
            sources.push(Box::new(
                collect_range(frozen, lower, upper)
                    .into_iter()
                    .map(Ok::<Entry, SstError>),
            ));
        }
        let corrupt = CorruptTables::default();
        for table in &snapshot.tables {
            let reader = table.reader();
            if reader.max_key() < start || (!end.is_empty() && reader.min_key() >= end) {
                continue;
            }
            let iter = match reader.iter_from(start) {
                Ok(iter) => iter,
                Err(e) => return Err(self.table_failed(table, e)),
            };
            let end = end.to_vec();
            let iter = iter.take_while(move |item| match item {
                Ok((key, _)) => end.is_empty() || *key < end,
                Err(_) => true,
            });
            sources.push(Box::new(corrupt.track(table, iter)));
        }

        let mut out = Vec::new();
        for item in MergeIterator::new(sources) {
            let (key, entry) = match item {
                Ok(item) => item,
                Err(e) => {
                    self.quarantine_tracked(&corrupt, &e);
                    return Err(e.into());
                }
            };
            if let Some(value) = entry.value {
                out.push((key, value));
            }
        }
        Ok(out)
    }
}

fn collect_range(mem: &Memtable, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Vec<Entry> {
    mem.range(lower, upper)
        .map(|(k, e)| (k.to_vec(), e.clone()))
        .collect()
}

impl Engine {
    /// Looks up `key`. Returns `Ok(None)` if it was never written or its
    /// newest version is a tombstone.
    ///
    /// # Errors
    ///
    /// SSTable read failures (corruption, I/O) and [`EngineError::Closed`](crate::EngineError::Closed).
    /// A corrupt table is quarantined before the error is returned.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    /// Returns all live pairs with `start <= key < end` in ascending key
    /// order. An empty `start` or `end` leaves that side unbounded.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.inner.scan(start, end)
    }
}
