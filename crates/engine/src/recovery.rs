//! Cold-start path: directory cleanup, manifest bootstrap, table loading and
//! WAL replay.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

use memtable::{Memtable, ValueEntry};
use parking_lot::{Mutex, RwLock};
use sstable::SstError;
use wal::{Wal, WalOptions, WalRecord};

use crate::error::Result;
use crate::manifest::{Level, Manifest};
use crate::quarantine::{quarantine_file, QUARANTINE_SUFFIX};
use crate::table::{parse_table_id, table_filename, Table};
use crate::{Config, EngineInner, State, Writer};

impl EngineInner {
    pub(crate) fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let dir = config.dir.clone();
        fs::create_dir_all(&dir)?;

        cleanup_tmp_files(&dir);

        let mut manifest = match Manifest::load(&dir)? {
            Some(m) => {
                remove_orphans(&dir, &m);
                m
            }
            None => bootstrap_manifest(&dir)?,
        };

        let tables = open_tables(&dir, &mut manifest)?;

        let mut mem = Memtable::new();
        let report = Wal::recover(&dir, |record| replay_record(&mut mem, record))?;

        let table_seq = tables
            .l0
            .iter()
            .chain(tables.l1.iter())
            .map(|t| t.reader().max_seq())
            .max()
            .unwrap_or(0);
        let seq = report.max_seq.max(table_seq);
        let next_file_id = highest_file_id(&dir)? + 1;

        let wal = Wal::open(
            &dir,
            WalOptions {
                segment_max_size: config.wal_segment_max_size,
                sync: config.wal_sync,
            },
        )?;

        tracing::info!(
            dir = %dir.display(),
            seq,
            wal_records = report.records,
            wal_segments = wal.segment_count(),
            mem_entries = mem.len(),
            l0 = tables.l0.len(),
            l1 = tables.l1.len(),
            quarantined = tables.quarantined.len(),
            "engine opened"
        );

        Ok(Self {
            config,
            writer: Mutex::new(Writer { wal: Some(wal), seq }),
            state: RwLock::new(State {
                mem,
                frozen: None,
                l0: tables.l0,
                l1: tables.l1,
                quarantined: tables.quarantined,
            }),
            manifest: Mutex::new(manifest),
            flush_lock: Mutex::new(()),
            compaction_lock: Mutex::new(()),
            next_file_id: AtomicU64::new(next_file_id),
            closed: AtomicBool::new(false),
        })
    }
}

/// Applies one replayed WAL record to the memtable.
pub(crate) fn replay_record(mem: &mut Memtable, record: WalRecord) {
    match record {
        WalRecord::Put { seq, key, value } => {
            mem.apply(key, ValueEntry::put(seq, value));
        }
        WalRecord::Del { seq, key } => {
            mem.apply(key, ValueEntry::tombstone(seq));
        }
    }
}

struct OpenedTables {
    l0: Vec<Arc<Table>>,
    l1: Vec<Arc<Table>>,
    quarantined: Vec<PathBuf>,
}

/// Opens every table the manifest lists. Tables that fail validation (or
/// are missing) are dropped from the manifest; a corrupt file is renamed
/// with a `.corrupt` suffix and kept for inspection.
fn open_tables(dir: &Path, manifest: &mut Manifest) -> Result<OpenedTables> {
    let mut opened = OpenedTables {
        l0: Vec::new(),
        l1: Vec::new(),
        quarantined: Vec::new(),
    };
    let mut rejected = Vec::new();

    for meta in manifest.entries() {
        let path = dir.join(&meta.filename);
        match Table::open(dir, &meta.filename) {
            Ok(table) => match meta.level {
                Level::L0 => opened.l0.push(Arc::new(table)),
                Level::L1 => opened.l1.push(Arc::new(table)),
            },
            Err(SstError::Io(e)) if e.kind() != std::io::ErrorKind::NotFound => {
                return Err(SstError::Io(e).into());
            }
            Err(e) => {
                tracing::error!(
                    table = %meta.filename,
                    error = %e,
                    "quarantining sstable that failed validation"
                );
                if path.exists() {
                    opened.quarantined.push(quarantine_file(&path)?);
                } else {
                    opened.quarantined.push(path);
                }
                rejected.push(meta.filename.clone());
            }
        }
    }

    if !rejected.is_empty() {
        manifest.remove_files(&rejected);
        manifest.save()?;
    }
    Ok(opened)
}

/// Builds a manifest for a directory that has none: every `.sst` file goes
/// to L0, newest file number first.
fn bootstrap_manifest(dir: &Path) -> Result<Manifest> {
    let mut ids: Vec<u64> = list_dir(dir)?
        .iter()
        .filter_map(|name| parse_table_id(name))
        .collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));

    let mut manifest = Manifest::empty(dir);
    // `add` inserts at the front of L0, so add oldest first.
    for id in ids.iter().rev() {
        manifest.add(table_filename(*id), Level::L0);
    }
    manifest.save()?;

    if !ids.is_empty() {
        tracing::info!(tables = ids.len(), "bootstrapped manifest from existing sstables");
    }
    Ok(manifest)
}

/// Removes `.sst.tmp` files left by an interrupted flush or compaction.
fn cleanup_tmp_files(dir: &Path) {
    if let Ok(names) = list_dir(dir) {
        for name in names.iter().filter(|n| n.ends_with(".sst.tmp")) {
            match fs::remove_file(dir.join(name)) {
                Ok(()) => tracing::debug!(file = %name, "removed leftover temp file"),
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove temp file"),
            }
        }
    }
}

/// Removes table files the manifest does not list: output of a compaction or
/// flush that crashed before committing.
fn remove_orphans(dir: &Path, manifest: &Manifest) {
    if let Ok(names) = list_dir(dir) {
        for name in names.iter().filter(|n| parse_table_id(n).is_some()) {
            if manifest.contains(name) {
                continue;
            }
            match fs::remove_file(dir.join(name)) {
                Ok(()) => tracing::warn!(table = %name, "removed orphaned sstable"),
                Err(e) => tracing::warn!(table = %name, error = %e, "failed to remove orphan"),
            }
        }
    }
}

/// Highest table number in use, including quarantined files.
fn highest_file_id(dir: &Path) -> Result<u64> {
    Ok(list_dir(dir)?
        .iter()
        .filter_map(|name| parse_table_id(name.strip_suffix(QUARANTINE_SUFFIX).unwrap_or(name)))
        .max()
        .unwrap_or(0))
}

fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
