//! # Manifest - SSTable Level Metadata
//!
//! Tracks which SSTable files belong to which level (L0 or L1) so that the
//! engine can rebuild its table list after a restart.
//!
//! ## File Format
//!
//! A text file with one SSTable per line, newest first within each level:
//!
//! ```text
//! # Strata SSTable Manifest
//! # Format: <level>:<filename>
//! L0:sst-0000000007.sst
//! L0:sst-0000000006.sst
//! L1:sst-0000000005.sst
//! ```
//!
//! Lines starting with `#` and blank lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is the commit point of flushes and compaction swaps. It is
//! rewritten atomically: write `MANIFEST.tmp`, fsync, rename over `MANIFEST`,
//! fsync the directory. A table file that exists on disk but is not listed
//! here is treated as garbage on the next open.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Name of the manifest file within the data directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// Level of one SSTable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Produced by a memtable flush; tables may overlap.
    L0,
    /// Produced by compaction.
    L1,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::L0 => "L0",
            Level::L1 => "L1",
        }
    }
}

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    /// Basename of the table file.
    pub filename: String,
    pub level: Level,
}

/// In-memory copy of the manifest.
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<SstMeta>,
}

impl Manifest {
    /// An empty manifest for `dir`. Nothing is written until [`save`](Self::save).
    pub fn empty(dir: &Path) -> Self {
        Self {
            path: dir.join(MANIFEST_FILENAME),
            entries: Vec::new(),
        }
    }

    /// Loads `dir/MANIFEST`. Returns `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// [`EngineError::Manifest`] for a malformed line, I/O errors otherwise.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILENAME);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (level, filename) = trimmed.split_once(':').ok_or_else(|| {
                EngineError::Manifest(format!(
                    "line {}: expected '<level>:<filename>', got '{}'",
                    line_num + 1,
                    trimmed
                ))
            })?;
            let level = match level {
                "L0" => Level::L0,
                "L1" => Level::L1,
                other => {
                    return Err(EngineError::Manifest(format!(
                        "line {}: unknown level '{}'",
                        line_num + 1,
                        other
                    )))
                }
            };
            if filename.is_empty() || filename.contains('/') || filename.contains('\\') {
                return Err(EngineError::Manifest(format!(
                    "line {}: invalid filename '{}'",
                    line_num + 1,
                    filename
                )));
            }

            entries.push(SstMeta {
                filename: filename.to_string(),
                level,
            });
        }

        Ok(Some(Self { path, entries }))
    }

    /// Persists the manifest atomically (tmp file, fsync, rename).
    pub fn save(&self) -> Result<()> {
        let tmp_path = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut w = BufWriter::new(file);
            writeln!(w, "# Strata SSTable Manifest")?;
            writeln!(w, "# Format: <level>:<filename>")?;
            for entry in &self.entries {
                writeln!(w, "{}:{}", entry.level.as_str(), entry.filename)?;
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                tracing::warn!(error = %cleanup, "failed to remove temporary manifest");
            }
            return Err(e.into());
        }
        if let Some(dir) = self.path.parent() {
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[SstMeta] {
        &self.entries
    }

    /// Filenames of one level, newest first.
    pub fn filenames(&self, level: Level) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.filename.as_str())
            .collect()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.entries.iter().any(|e| e.filename == filename)
    }

    /// Adds a table as the newest of its level (does not save).
    pub fn add(&mut self, filename: String, level: Level) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.level == level)
            .unwrap_or_else(|| match level {
                // L0 lines come before L1 lines.
                Level::L0 => 0,
                Level::L1 => self.entries.len(),
            });
        self.entries.insert(pos, SstMeta { filename, level });
    }

    /// Removes every listed filename (does not save).
    pub fn remove_files(&mut self, filenames: &[String]) {
        self.entries.retain(|e| !filenames.contains(&e.filename));
    }
}
