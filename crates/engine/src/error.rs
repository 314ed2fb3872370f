use std::io;

use config::ConfigError;
use sstable::SstError;
use wal::WalError;

/// Errors surfaced by [`Engine`](crate::Engine) operations.
///
/// A missing key is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("wal error: {0}")]
    Wal(#[from] WalError),

    #[error("sstable error: {0}")]
    Sstable(#[from] SstError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine is closed")]
    Closed,

    #[error("sequence number overflow")]
    SequenceOverflow,
}

pub type Result<T> = std::result::Result<T, EngineError>;
