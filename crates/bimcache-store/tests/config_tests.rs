use std::path::PathBuf;

use bimcache_store::{CacheKey, CacheStore, CacheStoreConfig, StoreError};
use tempfile::tempdir;

#[test]
fn test_config_from_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bimcache.json");
    std::fs::write(
        &path,
        r#"{
            "cache_dir": "/srv/bimcache",
            "use_mmap": true,
            "max_total_bytes": 536870912
        }"#,
    )
    .unwrap();

    let config = CacheStoreConfig::from_json_file(&path).unwrap();
    assert_eq!(config.cache_dir, PathBuf::from("/srv/bimcache"));
    assert!(config.use_mmap);
    assert!(config.verify_checksum);
    assert_eq!(config.max_total_bytes, Some(512 << 20));
    assert_eq!(config.max_age_days, None);
}

#[test]
fn test_config_json_roundtrip() {
    let config = CacheStoreConfig {
        max_age_days: Some(14),
        ..CacheStoreConfig::new("/tmp/bim")
    };
    let json = serde_json::to_string_pretty(&config).unwrap();
    let back: CacheStoreConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back, config);
}

#[test]
fn test_config_errors() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    assert!(matches!(
        CacheStoreConfig::from_json_file(&missing),
        Err(StoreError::Io { path, .. }) if path == missing
    ));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ cache_dir: ").unwrap();
    assert!(matches!(
        CacheStoreConfig::from_json_file(&broken),
        Err(StoreError::Config(_))
    ));
}

#[test]
fn test_open_creates_nested_cache_dir() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let store = CacheStore::open(CacheStoreConfig::new(&nested)).unwrap();
    assert!(nested.is_dir());

    let key = CacheKey::from_source(b"ISO-10303-21;");
    assert!(store.path_for(&key).starts_with(&nested));
    assert!(store.load(&key).unwrap().is_none());
}
