//! # Config
//!
//! Tunables for a Strata engine instance. Everything except the data
//! directory has a usable default.
//!
//! ```rust
//! use config::Config;
//!
//! let cfg = Config::builder()
//!     .dir("/tmp/strata")
//!     .memtable_max_size(1024 * 1024)
//!     .compaction_interval_ms(0)
//!     .build();
//! assert!(cfg.validate().is_ok());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("data directory must not be empty")]
    EmptyDir,

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("bloom false positive rate must be in (0, 1), got {0}")]
    FalsePositiveRate(f64),

    #[error("compaction trigger must be at least 2, got {0}")]
    CompactionTrigger(usize),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage
    // -------------------------------------------------------------------------
    /// Directory holding WAL segments, SSTables and the MANIFEST.
    pub dir: PathBuf,

    // -------------------------------------------------------------------------
    // Memtable
    // -------------------------------------------------------------------------
    /// Approximate key + value bytes after which the memtable is flushed.
    pub memtable_max_size: usize,

    // -------------------------------------------------------------------------
    // Compaction
    // -------------------------------------------------------------------------
    /// Background compaction period in milliseconds. `0` disables the
    /// compactor thread; `Engine::compact` still works.
    pub compaction_interval_ms: u64,

    /// Minimum number of SSTables before a timed compaction merges them.
    pub compaction_trigger: usize,

    // -------------------------------------------------------------------------
    // WAL
    // -------------------------------------------------------------------------
    /// A segment that would grow past this many bytes is rotated.
    pub wal_segment_max_size: u64,

    /// fsync after every append.
    pub wal_sync: bool,

    // -------------------------------------------------------------------------
    // SSTable
    // -------------------------------------------------------------------------
    /// Target false-positive rate of each SSTable's bloom filter.
    pub bloom_false_positive_rate: f64,

    /// Keys per sparse-index block.
    pub index_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./strata_data"),
            memtable_max_size: 4 * 1024 * 1024, // 4 MiB
            compaction_interval_ms: 10_000,
            compaction_trigger: 4,
            wal_segment_max_size: 16 * 1024 * 1024, // 16 MiB
            wal_sync: true,
            bloom_false_positive_rate: 0.01,
            index_interval: 16,
        }
    }
}

impl Config {
    /// Default configuration rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Checks every field for a value the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDir);
        }
        if self.memtable_max_size == 0 {
            return Err(ConfigError::Zero {
                field: "memtable_max_size",
            });
        }
        if self.wal_segment_max_size == 0 {
            return Err(ConfigError::Zero {
                field: "wal_segment_max_size",
            });
        }
        if self.index_interval == 0 {
            return Err(ConfigError::Zero {
                field: "index_interval",
            });
        }
        let p = self.bloom_false_positive_rate;
        if !(p > 0.0 && p < 1.0) {
            return Err(ConfigError::FalsePositiveRate(p));
        }
        if self.compaction_trigger < 2 {
            return Err(ConfigError::CompactionTrigger(self.compaction_trigger));
        }
        Ok(())
    }
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir = path.into();
        self
    }

    pub fn memtable_max_size(mut self, bytes: usize) -> Self {
        self.config.memtable_max_size = bytes;
        self
    }

    pub fn compaction_interval_ms(mut self, ms: u64) -> Self {
        self.config.compaction_interval_ms = ms;
        self
    }

    pub fn compaction_trigger(mut self, tables: usize) -> Self {
        self.config.compaction_trigger = tables;
        self
    }

    pub fn wal_segment_max_size(mut self, bytes: u64) -> Self {
        self.config.wal_segment_max_size = bytes;
        self
    }

    pub fn wal_sync(mut self, sync: bool) -> Self {
        self.config.wal_sync = sync;
        self
    }

    pub fn bloom_false_positive_rate(mut self, p: f64) -> Self {
        self.config.bloom_false_positive_rate = p;
        self
    }

    pub fn index_interval(mut self, keys: usize) -> Self {
        self.config.index_interval = keys;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
