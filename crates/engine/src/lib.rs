//! # Strata Engine
//!
//! The LSM-tree storage engine that ties together the WAL, the memtable and
//! SSTables. Every mutation is first appended to the write-ahead log for
//! durability, then applied to an in-memory sorted memtable. When the
//! memtable grows past `memtable_max_size` it is frozen and written to a new
//! L0 SSTable; compaction later merges all tables into a single L1 table.
//!
//! ## Read Path
//!
//! `get(key)` checks, in order: the active memtable, the frozen memtable
//! (while a flush is writing it), L0 SSTables newest first, then L1. The
//! first hit wins and a tombstone hides every older value.
//!
//! ## Concurrency
//!
//! All methods take `&self`; an `Engine` can be shared across threads behind
//! an `Arc`. Mutations are serialized by one mutation lock held across
//! "append WAL, apply to memtable". Lookups take a read lock just long enough
//! to probe the memtables and clone the table handles; SSTable I/O happens
//! with no engine lock held.
//!
//! ## Crash Safety
//!
//! - WAL records are fsynced before the write returns (when `wal_sync` is on)
//!   and a torn tail is truncated on recovery.
//! - SSTables are written to a temp file and renamed into place.
//! - The MANIFEST is the commit point for flushes and compactions; table
//!   files it does not list are deleted on open.
//! - WAL segments are purged only after the SSTable holding their data has
//!   been committed to the manifest.
//! - A table that turns out to be corrupt, at open or on a later read, is
//!   dropped from the manifest and renamed `*.corrupt`.
//!
//! `close()` and `Drop` do **not** flush the memtable: unflushed writes are
//! recovered from the WAL on the next open.

mod compaction;
mod error;
mod manifest;
mod quarantine;
mod read;
mod recovery;
mod stats;
mod table;
mod write;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use memtable::Memtable;
use parking_lot::{Mutex, RwLock};
use sstable::WriterOptions;
use wal::Wal;

use crate::compaction::Compactor;
use crate::table::Table;

pub use compaction::CompactionReport;
pub use config::{Config, ConfigBuilder, ConfigError};
pub use error::{EngineError, Result};
pub use manifest::{Level, Manifest, SstMeta, MANIFEST_FILENAME};
pub use stats::EngineStats;

/// The append side: the open WAL and the last assigned sequence number.
/// `wal` is `None` once the engine is closed.
pub(crate) struct Writer {
    wal: Option<Wal>,
    seq: u64,
}

/// Everything a lookup needs to see.
pub(crate) struct State {
    mem: Memtable,
    /// Memtable being written to an SSTable by a flush.
    frozen: Option<Arc<Memtable>>,
    /// Newest first.
    l0: Vec<Arc<Table>>,
    l1: Vec<Arc<Table>>,
    /// Table files set aside because they failed validation.
    quarantined: Vec<PathBuf>,
}

impl State {
    pub(crate) fn sstable_count(&self) -> usize {
        self.l0.len() + self.l1.len()
    }
}

/// Shared engine internals; the compactor thread holds its own `Arc`.
///
/// Lock order: `flush_lock`/`compaction_lock`, then `manifest`, then
/// `writer`, then `state`.
pub(crate) struct EngineInner {
    config: Config,
    writer: Mutex<Writer>,
    state: RwLock<State>,
    manifest: Mutex<Manifest>,
    flush_lock: Mutex<()>,
    compaction_lock: Mutex<()>,
    next_file_id: AtomicU64,
    closed: AtomicBool,
}

impl EngineInner {
    pub(crate) fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            bloom_false_positive_rate: self.config.bloom_false_positive_rate,
            index_interval: self.config.index_interval,
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.config.dir
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub(crate) fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// The LSM storage engine.
///
/// Created with [`Engine::new`]; safe to share across threads.
pub struct Engine {
    inner: Arc<EngineInner>,
    compactor: Mutex<Option<Compactor>>,
}

impl Engine {
    /// Opens (or creates) the database in `config.dir`.
    ///
    /// Startup sequence:
    ///
    /// 1. Validate the configuration and create the directory.
    /// 2. Remove `.sst.tmp` leftovers and table files the manifest does not
    ///    list (or bootstrap a manifest from existing tables).
    /// 3. Open every listed table; a table that fails validation is
    ///    quarantined instead of failing the open.
    /// 4. Replay all WAL segments into a fresh memtable, truncating a torn
    ///    tail.
    /// 5. Restore the sequence counter from the WAL and table footers.
    /// 6. Start the background compactor if `compaction_interval_ms > 0`.
    pub fn new(config: Config) -> Result<Self> {
        let inner = Arc::new(EngineInner::open(config)?);

        let compactor = if inner.config.compaction_interval_ms > 0 {
            Some(Compactor::spawn(Arc::clone(&inner))?)
        } else {
            None
        };

        Ok(Self {
            inner,
            compactor: Mutex::new(compactor),
        })
    }

    /// Stops the compactor and releases the WAL. Does **not** flush the
    /// memtable. Every later operation returns [`EngineError::Closed`].
    /// Calling `close` twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if let Some(compactor) = self.compactor.lock().take() {
            compactor.stop();
        }

        let mut writer = self.inner.writer.lock();
        self.inner.closed.store(true, Ordering::Release);
        if let Some(mut wal) = writer.wal.take() {
            wal.sync()?;
            tracing::info!(dir = %self.inner.dir().display(), seq = writer.seq, "engine closed");
        }
        Ok(())
    }

    /// Last sequence number handed out.
    pub fn seq(&self) -> u64 {
        self.inner.writer.lock().seq
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn dir(&self) -> &Path {
        self.inner.dir()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Engine")
            .field("dir", &self.inner.config.dir)
            .field("mem_entries", &state.mem.len())
            .field("mem_bytes", &state.mem.approx_size())
            .field("l0_sstables", &state.l0.len())
            .field("l1_sstables", &state.l1.len())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // The compactor thread owns an `Arc` of the internals; stop it so
        // they can be released. The memtable is left to WAL recovery.
        if let Some(compactor) = self.compactor.get_mut().take() {
            compactor.stop();
        }
    }
}

#[cfg(test)]
mod tests;
