//! Store-level errors.

use std::path::PathBuf;

use bimcache_format::CacheError;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache key {0:?}")]
    InvalidKey(String),

    #[error("invalid cache store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// A cache file exists but cannot be used; the model should be rebuilt.
    pub fn is_stale_or_corrupt(&self) -> bool {
        matches!(self, StoreError::Cache(e) if e.is_stale_or_corrupt())
    }
}
