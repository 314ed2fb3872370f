use std::path::PathBuf;

use crate::Engine;

/// Point-in-time counters describing the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Approximate key + value bytes in the active memtable.
    pub memtable_size: usize,
    /// Live (non-tombstone) keys in the active memtable.
    pub memtable_entries: usize,
    /// Tombstones in the active memtable.
    pub deleted_keys: usize,
    /// Entries in a memtable currently being flushed.
    pub frozen_entries: usize,
    pub sstable_count: usize,
    pub l0_count: usize,
    pub l1_count: usize,
    /// WAL segment files on disk (0 once closed).
    pub wal_segments: usize,
    /// Last sequence number handed out.
    pub last_sequence: u64,
    /// Table files set aside because they failed validation.
    pub quarantined_sstables: usize,
}

impl Engine {
    /// Collects [`EngineStats`]. Works on a closed engine too.
    pub fn stats(&self) -> EngineStats {
        let (wal_segments, last_sequence) = {
            let writer = self.inner.writer.lock();
            (
                writer.wal.as_ref().map_or(0, |w| w.segment_count()),
                writer.seq,
            )
        };

        let state = self.inner.state.read();
        EngineStats {
            memtable_size: state.mem.approx_size(),
            memtable_entries: state.mem.live_len(),
            deleted_keys: state.mem.tombstone_count(),
            frozen_entries: state.frozen.as_ref().map_or(0, |f| f.len()),
            sstable_count: state.sstable_count(),
            l0_count: state.l0.len(),
            l1_count: state.l1.len(),
            wal_segments,
            last_sequence,
            quarantined_sstables: state.quarantined.len(),
        }
    }

    /// Paths of table files set aside because they failed validation.
    pub fn quarantined(&self) -> Vec<PathBuf> {
        self.inner.state.read().quarantined.clone()
    }
}
