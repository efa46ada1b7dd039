//! Store configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub const ENV_DIR: &str = "BIMCACHE_DIR";
pub const ENV_MMAP: &str = "BIMCACHE_MMAP";
pub const ENV_VERIFY: &str = "BIMCACHE_VERIFY";
pub const ENV_MAX_BYTES: &str = "BIMCACHE_MAX_BYTES";
pub const ENV_MAX_AGE_DAYS: &str = "BIMCACHE_MAX_AGE_DAYS";

/// Configuration for a [`CacheStore`](crate::CacheStore)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStoreConfig {
    /// Directory holding `<key>.bimc` files
    pub cache_dir: PathBuf,
    /// Map cache files instead of reading them onto the heap
    pub use_mmap: bool,
    /// Verify the xxh3 checksum on load
    pub verify_checksum: bool,
    /// Size limit enforced by `prune`
    pub max_total_bytes: Option<u64>,
    /// Age limit enforced by `prune`
    pub max_age_days: Option<u32>,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./.bimcache"),
            use_mmap: false,
            verify_checksum: true,
            max_total_bytes: None,
            max_age_days: None,
        }
    }
}

impl CacheStoreConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_json_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))
    }

    /// Defaults overridden by `BIMCACHE_*` environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_DIR) {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = lookup(ENV_MMAP) {
            config.use_mmap = parse_bool(ENV_MMAP, &v)?;
        }
        if let Some(v) = lookup(ENV_VERIFY) {
            config.verify_checksum = parse_bool(ENV_VERIFY, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_BYTES) {
            config.max_total_bytes = Some(parse_number(ENV_MAX_BYTES, &v)?);
        }
        if let Some(v) = lookup(ENV_MAX_AGE_DAYS) {
            config.max_age_days = Some(parse_number(ENV_MAX_AGE_DAYS, &v)?);
        }
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> StoreResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(StoreError::Config(format!("{name}: expected a boolean, got {other:?}"))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> StoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{name}: expected a number, got {value:?}")))
}
