//! Compaction: merges every SSTable into a single L1 SSTable.
//!
//! Uses [`MergeIterator`] to stream all tables in key order, keeping the
//! entry with the highest sequence number per key. Since every table takes
//! part, no older version can exist below the output and tombstones are
//! dropped. The output is written atomically (temp file + rename) and
//! committed through the manifest; the input files are deleted once no
//! reader holds them any more.
//!
//! The [`Compactor`] runs this on a timer thread whenever the table count
//! reaches `compaction_trigger`.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use sstable::{MergeIterator, SSTableWriter, SstError};

use crate::error::{EngineError, Result};
use crate::manifest::Level;
use crate::quarantine::CorruptTables;
use crate::table::{discard_partial, table_filename, Table};
use crate::{Engine, EngineInner};

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Tables merged (0 if there was nothing to do).
    pub inputs: usize,
    /// Records in the output table.
    pub entries_written: usize,
    /// Tombstones discarded during the merge.
    pub tombstones_dropped: usize,
}

impl EngineInner {
    pub(crate) fn sstable_count(&self) -> usize {
        self.state.read().sstable_count()
    }

    /// Merges all current SSTables into one L1 table.
    ///
    /// A flush that lands while the merge runs is left alone: its table is
    /// newer than every input and stays in L0. On any error the partial
    /// output is removed and the inputs stay active, except one that was
    /// found corrupt.
    pub(crate) fn compact(&self) -> Result<CompactionReport> {
        let _compaction_guard = self.compaction_lock.lock();
        self.ensure_open()?;

        let inputs: Vec<Arc<Table>> = {
            let state = self.state.read();
            state.l0.iter().chain(state.l1.iter()).cloned().collect()
        };
        if inputs.len() < 2 {
            return Ok(CompactionReport::default());
        }

        tracing::info!(inputs = inputs.len(), "compaction started");

        let id = self.allocate_file_id();
        let name = table_filename(id);
        let path = self.dir().join(&name);

        let merged = self.merge_into(&path, &inputs);
        let (entries_written, tombstones_dropped) = match merged {
            Ok(counts) => counts,
            Err(e) => {
                discard_partial(&path);
                return Err(e);
            }
        };

        let output = if entries_written > 0 {
            match Table::open(self.dir(), &name) {
                Ok(t) => Some(Arc::new(t)),
                Err(e) => {
                    discard_partial(&path);
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let input_names: Vec<String> = inputs.iter().map(|t| t.name().to_string()).collect();
        {
            let mut manifest = self.manifest.lock();
            let before = manifest.clone();
            manifest.remove_files(&input_names);
            if output.is_some() {
                manifest.add(name.clone(), Level::L1);
            }
            if let Err(e) = manifest.save() {
                *manifest = before;
                drop(manifest);
                if let Some(t) = &output {
                    t.mark_obsolete();
                }
                return Err(e);
            }

            let mut state = self.state.write();
            state.l0.retain(|t| !input_names.iter().any(|n| n == t.name()));
            state.l1 = output.into_iter().collect();
        }

        for table in &inputs {
            table.mark_obsolete();
        }

        tracing::info!(
            inputs = inputs.len(),
            output = %name,
            entries_written,
            tombstones_dropped,
            "compaction finished"
        );

        Ok(CompactionReport {
            inputs: inputs.len(),
            entries_written,
            tombstones_dropped,
        })
    }

    /// Streams the merged, tombstone-free contents of `inputs` into `path`.
    /// Returns `(entries_written, tombstones_dropped)`; `(0, n)` when every
    /// key was deleted and no file was produced.
    ///
    /// An input that turns out to be corrupt is quarantined, so the next
    /// pass runs without it.
    fn merge_into(&self, path: &Path, inputs: &[Arc<Table>]) -> Result<(usize, usize)> {
        let corrupt = CorruptTables::default();
        let mut sources = Vec::with_capacity(inputs.len());
        for table in inputs {
            match table.reader().iter() {
                Ok(iter) => sources.push(corrupt.track(table, iter)),
                Err(e) => return Err(self.table_failed(table, e)),
            }
        }
        let expected: usize = inputs.iter().map(|t| t.reader().len()).sum();

        let mut dropped = 0usize;
        let live = MergeIterator::new(sources).filter(|item| match item {
            Ok((_, entry)) if entry.is_tombstone() => {
                dropped += 1;
                false
            }
            _ => true,
        });

        match SSTableWriter::write_from_iterator(path, expected, self.writer_options(), live) {
            Ok(written) => Ok((written, dropped)),
            Err(SstError::Empty) => Ok((0, dropped)),
            Err(e) => {
                self.quarantine_tracked(&corrupt, &e);
                Err(EngineError::from(e))
            }
        }
    }
}

impl Engine {
    /// Runs a full compaction now, regardless of `compaction_trigger`.
    /// A no-op when fewer than two SSTables exist.
    pub fn compact(&self) -> Result<CompactionReport> {
        self.inner.compact()
    }
}

/// Background thread that compacts on a fixed interval.
///
/// Stopped cooperatively: dropping the shutdown sender wakes the thread,
/// which exits at its next `select!`, and [`stop`](Compactor::stop) joins it.
pub(crate) struct Compactor {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Compactor {
    pub(crate) fn spawn(inner: Arc<EngineInner>) -> Result<Self> {
        let interval = Duration::from_millis(inner.config.compaction_interval_ms);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("compactor".into())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "compactor started");
                run(&inner, shutdown_rx, interval);
                tracing::debug!("compactor stopped");
            })
            .map_err(EngineError::Io)?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("compactor thread panicked");
            }
        }
    }
}

fn run(inner: &EngineInner, shutdown: Receiver<()>, interval: Duration) {
    let ticker = channel::tick(interval);
    loop {
        channel::select! {
            recv(ticker) -> _ => run_scheduled(inner),
            recv(shutdown) -> _ => return,
        }
    }
}

/// One timer tick. Errors are logged and retried on the next tick.
fn run_scheduled(inner: &EngineInner) {
    if inner.is_closed() || inner.sstable_count() < inner.config.compaction_trigger {
        return;
    }
    if let Err(e) = inner.compact() {
        tracing::error!(error = %e, "background compaction failed");
    }
}
