use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::{Config, Engine};

/// Installs a test subscriber once; `RUST_LOG=debug` shows engine logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with the background compactor off and no fsync.
pub fn test_config(dir: &Path) -> Config {
    Config::builder()
        .dir(dir)
        .compaction_interval_ms(0)
        .wal_sync(false)
        .build()
}

pub fn open(dir: &Path) -> Result<Engine> {
    init_tracing();
    Ok(Engine::new(test_config(dir))?)
}

/// Engine that flushes once the memtable holds `memtable_max_size` bytes.
pub fn open_small(dir: &Path, memtable_max_size: usize) -> Result<Engine> {
    init_tracing();
    let mut config = test_config(dir);
    config.memtable_max_size = memtable_max_size;
    Ok(Engine::new(config)?)
}

pub fn key(i: usize) -> Vec<u8> {
    format!("k{:05}", i).into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value-{}", i).into_bytes()
}

/// Files in `dir` named `*.<ext>`.
pub fn count_files(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|s| s.to_str())
                        .map(|x| x == ext)
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

pub fn count_sst_files(dir: &Path) -> usize {
    count_files(dir, "sst")
}
