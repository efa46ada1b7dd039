//! BimCache on-disk store
//!
//! Keeps one `<key>.bimc` file per parsed source model, keyed by the SHA-256
//! of the source bytes:
//!
//! ```text
//!   source.ifc ──sha256──► CacheKey ──► <cache_dir>/<key>.bimc
//!                                            │
//!        load ◄── CacheReader ◄── read / mmap┘
//!        save ──► CacheWriter ──► <key>.<pid>-<n>.bimc.tmp ──fsync──► rename
//! ```
//!
//! ## Key Features
//!
//! - **Atomic publish**: readers never observe a partially written file
//! - **Rebuild fallback**: stale or corrupt entries are discarded and rebuilt
//! - **Background save**: encode and publish off the caller's thread
//! - **Pruning**: by age, then by total size, oldest first

pub mod config;
pub mod error;
pub mod key;


use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bimcache_format::{
    CacheError, CacheReader, CacheWriter, LoadedCache, ModelCache, ReadOptions, WriteOptions,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use memmap2::Mmap;
use tracing::{debug, info, warn};

pub use config::CacheStoreConfig;
pub use error::{StoreError, StoreResult};
pub use key::CacheKey;

pub const CACHE_EXTENSION: &str = "bimc";
const TMP_SUFFIX: &str = ".bimc.tmp";

/// Makes temp names unique across writers in this process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    /// Oldest first
    pub entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<CacheKey>,
    pub freed_bytes: u64,
}

// ============================================================================
// Store
// ============================================================================

/// Directory of model caches. Cloning shares nothing but the configuration.
#[derive(Debug, Clone)]
pub struct CacheStore {
    config: CacheStoreConfig,
    reader: CacheReader,
    write_options: WriteOptions,
}

impl CacheStore {
    /// Create the cache directory if needed and drop temp files left by an
    /// interrupted save.
    pub fn open(config: CacheStoreConfig) -> StoreResult<Self> {
        let dir = &config.cache_dir;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
            let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
            let is_tmp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(TMP_SUFFIX));
            if is_tmp {
                debug!(path = %path.display(), "removing leftover temp file");
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            }
        }

        let reader = CacheReader::new(ReadOptions {
            verify_checksum: config.verify_checksum,
            ..Default::default()
        });
        info!(dir = %dir.display(), mmap = config.use_mmap, "cache store opened");
        Ok(Self {
            config,
            reader,
            write_options: WriteOptions::default(),
        })
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.write_options = options;
        self
    }

    pub fn config(&self) -> &CacheStoreConfig {
        &self.config
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.config.cache_dir.join(key.file_name())
    }

    /// A fresh temp path per call, so overlapping saves of one key never
    /// share a file.
    fn tmp_path_for(&self, key: &CacheKey) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.config
            .cache_dir
            .join(format!("{key}.{}-{n}{TMP_SUFFIX}", std::process::id()))
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    fn read_file(&self, path: &Path) -> std::io::Result<Bytes> {
        if self.config.use_mmap {
            let file = File::open(path)?;
            // SAFETY: cache files are replaced by rename, never modified in place.
            let map = unsafe { Mmap::map(&file)? };
            Ok(Bytes::from_owner(map))
        } else {
            fs::read(path).map(Bytes::from)
        }
    }

    /// `Ok(None)` when no cache exists for `key`; `Err` when one exists but
    /// cannot be used.
    pub fn load(&self, key: &CacheKey) -> StoreResult<Option<LoadedCache>> {
        let path = self.path_for(key);
        let bytes = match self.read_file(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "cache miss");
                return Ok(None);
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let size = bytes.len();
        let loaded = self.reader.read(bytes)?;

        let stored_key = loaded
            .cache
            .metadata()
            .and_then(|m| m.source_key.as_deref());
        if let Some(stored) = stored_key {
            if stored != key.as_str() {
                return Err(CacheError::CorruptCache(format!(
                    "file for {key} was written for source {stored}"
                ))
                .into());
            }
        }

        info!(
            key = %key,
            bytes = size,
            entities = loaded.cache.entities().len(),
            issues = loaded.report.issues.len(),
            "cache loaded"
        );
        Ok(Some(loaded))
    }

    /// Encode and atomically publish; returns the file size.
    pub fn save(&self, key: &CacheKey, cache: &ModelCache) -> StoreResult<u64> {
        let bytes = CacheWriter::new(self.write_options.clone()).write(cache)?;
        self.publish(key, &bytes)?;
        info!(key = %key, bytes = bytes.len(), "cache saved");
        Ok(bytes.len() as u64)
    }

    fn publish(&self, key: &CacheKey, bytes: &[u8]) -> StoreResult<()> {
        let tmp = self.tmp_path_for(key);
        let path = self.path_for(key);
        let result = File::create(&tmp)
            .and_then(|mut f| {
                f.write_all(bytes)?;
                f.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    /// Returns whether a file was removed.
    pub fn remove(&self, key: &CacheKey) -> StoreResult<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Remove every cache entry; returns how many were removed.
    pub fn clear(&self) -> StoreResult<usize> {
        let stats = self.stats()?;
        for entry in &stats.entries {
            self.remove(&entry.key)?;
        }
        info!(removed = stats.entry_count, "cache cleared");
        Ok(stats.entry_count)
    }

    pub fn stats(&self) -> StoreResult<CacheStats> {
        let dir = &self.config.cache_dir;
        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
            let dir_entry = dir_entry.map_err(|e| StoreError::io(dir, e))?;
            let path = dir_entry.path();
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(CACHE_EXTENSION))
                .and_then(|n| n.strip_suffix('.'))
                .and_then(|stem| CacheKey::parse(stem).ok())
            else {
                continue;
            };
            let meta = dir_entry
                .metadata()
                .map_err(|e| StoreError::io(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(|e| StoreError::io(&path, e))?;
            entries.push(CacheEntry {
                key,
                size: meta.len(),
                modified: DateTime::<Utc>::from(modified),
            });
        }
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));

        Ok(CacheStats {
            entry_count: entries.len(),
            total_bytes: entries.iter().map(|e| e.size).sum(),
            entries,
        })
    }

    /// Load the cache for `key`, or rebuild and save it.
    ///
    /// Stale or corrupt entries are removed before `rebuild` runs. Other
    /// load errors propagate without calling `rebuild`. A failed save after
    /// a rebuild is logged and the rebuilt model is still returned.
    pub fn load_or_rebuild<F, E>(&self, key: &CacheKey, rebuild: F) -> Result<ModelCache, E>
    where
        F: FnOnce() -> Result<ModelCache, E>,
        E: From<StoreError>,
    {
        match self.load(key) {
            Ok(Some(loaded)) => return Ok(loaded.cache),
            Ok(None) => {}
            Err(err) if err.is_stale_or_corrupt() => {
                warn!(key = %key, error = %err, "discarding unusable cache, rebuilding");
                self.remove(key)?;
            }
            Err(err) => return Err(err.into()),
        }

        let cache = rebuild()?;
        if let Err(err) = self.save(key, &cache) {
            warn!(key = %key, error = %err, "failed to save rebuilt cache");
        }
        Ok(cache)
    }

    /// Encode and publish on a worker thread.
    pub fn save_in_background(
        &self,
        key: CacheKey,
        cache: Arc<ModelCache>,
    ) -> StoreResult<JoinHandle<StoreResult<u64>>> {
        let store = self.clone();
        std::thread::Builder::new()
            .name("bimcache_save".to_string())
            .spawn(move || {
                let result = store.save(&key, &cache);
                if let Err(err) = &result {
                    warn!(key = %key, error = %err, "background cache save failed");
                }
                result
            })
            .map_err(|e| StoreError::io(&self.config.cache_dir, e))
    }

    /// Drop entries older than `max_age_days`, then the oldest entries until
    /// the total is within `max_total_bytes`.
    pub fn prune(&self) -> StoreResult<PruneReport> {
        self.prune_at(Utc::now())
    }

    fn prune_at(&self, now: DateTime<Utc>) -> StoreResult<PruneReport> {
        let stats = self.stats()?;
        let mut report = PruneReport::default();
        let mut total = stats.total_bytes;
        let cutoff = self
            .config
            .max_age_days
            .map(|days| now - Duration::days(i64::from(days)));

        for entry in stats.entries {
            let expired = cutoff.is_some_and(|c| entry.modified < c);
            let over_budget = self.config.max_total_bytes.is_some_and(|max| total > max);
            if !expired && !over_budget {
                continue;
            }
            if self.remove(&entry.key)? {
                total = total.saturating_sub(entry.size);
                report.freed_bytes += entry.size;
                report.removed.push(entry.key);
            }
        }

        info!(
            removed = report.removed.len(),
            freed_bytes = report.freed_bytes,
            remaining_bytes = total,
            "cache pruned"
        );
        Ok(report)
    }
}
