//! Segmented log: a directory of `wal-NNNNNN.log` files replayed in index
//! order.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::{WalError, WalReader, WalRecord, WalWriter};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// Options for [`Wal::open`].
#[derive(Debug, Clone, Copy)]
pub struct WalOptions {
    /// A segment that would grow past this many bytes is rotated. A single
    /// record larger than the limit still goes into a fresh segment.
    pub segment_max_size: u64,
    /// fsync after every append.
    pub sync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            segment_max_size: 16 * 1024 * 1024,
            sync: true,
        }
    }
}

/// What [`Wal::recover`] found on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records replayed across all segments.
    pub records: usize,
    /// Segment files read.
    pub segments: usize,
    /// Segments whose torn tail was cut off.
    pub truncated: usize,
    /// Bytes removed by tail truncation.
    pub bytes_discarded: u64,
    /// Highest sequence number replayed, 0 if none.
    pub max_seq: u64,
}

/// Path of segment `index` inside `dir`.
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", SEGMENT_PREFIX, index, SEGMENT_SUFFIX))
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Indexes of all segment files in `dir`, ascending. A missing directory has
/// no segments.
pub fn list_segments(dir: &Path) -> Result<Vec<u64>, WalError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut indexes = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(parse_segment_name) {
            indexes.push(index);
        }
    }
    indexes.sort_unstable();
    Ok(indexes)
}

/// The active write-ahead log of one data directory.
///
/// Appends always go to the highest-numbered segment. Older segments stay on
/// disk until [`purge_before`](Self::purge_before) declares them obsolete.
pub struct Wal {
    dir: PathBuf,
    opts: WalOptions,
    writer: WalWriter,
    current: u64,
    segments: Vec<u64>,
}

impl Wal {
    /// Replays every segment in `dir` in order, calling `apply` per record.
    ///
    /// Torn tails are physically truncated so later appends never land after
    /// garbage. Corruption in the middle of a segment is an error.
    pub fn recover<F>(dir: &Path, mut apply: F) -> Result<RecoveryReport, WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut report = RecoveryReport::default();

        for index in list_segments(dir)? {
            let path = segment_path(dir, index);
            let file_len = fs::metadata(&path)?.len();

            let summary = match WalReader::open(&path)?.replay(&mut apply) {
                Ok(summary) => summary,
                Err(WalError::Corrupt { offset }) => {
                    tracing::error!(segment = %path.display(), offset, "corrupt WAL record");
                    return Err(WalError::Corrupt { offset });
                }
                Err(e) => return Err(e),
            };

            report.segments += 1;
            report.records += summary.records;
            report.max_seq = report.max_seq.max(summary.max_seq);

            if summary.torn || summary.valid_len < file_len {
                let discarded = file_len - summary.valid_len;
                truncate_segment(&path, summary.valid_len)?;
                report.truncated += 1;
                report.bytes_discarded += discarded;
                tracing::warn!(
                    segment = %path.display(),
                    valid_len = summary.valid_len,
                    discarded,
                    "truncated torn WAL tail"
                );
            }
        }

        tracing::info!(
            records = report.records,
            segments = report.segments,
            truncated = report.truncated,
            max_seq = report.max_seq,
            "WAL replay complete"
        );
        Ok(report)
    }

    /// Reads every record of every segment in `dir`, in write order, without
    /// modifying anything.
    pub fn read_all(dir: &Path) -> Result<Vec<WalRecord>, WalError> {
        let mut records = Vec::new();
        for index in list_segments(dir)? {
            WalReader::open(segment_path(dir, index))?.replay(|r| records.push(r))?;
        }
        Ok(records)
    }

    /// Opens the log in `dir` for appending, creating the directory and the
    /// first segment if needed. Call [`recover`](Self::recover) first: the
    /// newest segment is reopened as-is.
    pub fn open(dir: &Path, opts: WalOptions) -> Result<Self, WalError> {
        fs::create_dir_all(dir)?;

        let mut segments = list_segments(dir)?;
        let current = match segments.last() {
            Some(&last) => last,
            None => {
                segments.push(1);
                1
            }
        };
        let writer = WalWriter::create(segment_path(dir, current), opts.sync)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            opts,
            writer,
            current,
            segments,
        })
    }

    /// Appends one record, rotating first if it would overflow the segment
    /// or if an earlier failed append left the segment unusable.
    pub fn append(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let full = !self.writer.is_empty()
            && self.writer.len() + record.encoded_len() > self.opts.segment_max_size;
        if full || self.writer.is_poisoned() {
            self.rotate()?;
        }
        self.writer.append(record)
    }

    /// Closes the current segment and starts a new one. Returns the new
    /// segment's index: every older segment holds only records written before
    /// this call.
    pub fn rotate(&mut self) -> Result<u64, WalError> {
        match self.writer.sync_to_disk() {
            Ok(()) => {}
            // Recovery cuts the garbage off a poisoned segment.
            Err(e) if self.writer.is_poisoned() => {
                tracing::warn!(segment = self.current, error = %e, "sync of poisoned WAL segment failed");
            }
            Err(e) => return Err(e),
        }

        let next = self.current + 1;
        self.writer = WalWriter::create(segment_path(&self.dir, next), self.opts.sync)?;
        self.current = next;
        self.segments.push(next);

        tracing::debug!(segment = next, "rotated WAL segment");
        Ok(next)
    }

    /// Deletes every segment with an index below `index`. The current segment
    /// is never deleted. Returns how many files were removed.
    pub fn purge_before(&mut self, index: u64) -> Result<usize, WalError> {
        let limit = index.min(self.current);
        let mut removed = 0;

        while let Some(&oldest) = self.segments.first() {
            if oldest >= limit {
                break;
            }
            match fs::remove_file(segment_path(&self.dir, oldest)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.segments.remove(0);
            removed += 1;
        }

        if removed > 0 {
            tracing::debug!(removed, before = limit, "purged WAL segments");
        }
        Ok(removed)
    }

    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.sync_to_disk()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn current_segment(&self) -> u64 {
        self.current
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn truncate_segment(path: &Path, len: u64) -> Result<(), WalError> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}
