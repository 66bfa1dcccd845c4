//! Shared fixtures for unit tests across modules, mirroring the teacher's own
//! `tmp_cache()` helper in `cache.rs`'s test module but shared crate-wide instead of
//! re-typed in every file.

use crate::cache::Cache;
use crate::config::Config;
use tempfile::TempDir;

/// A fresh temp directory plus a `Cache` rooted in it. The `TempDir` must be kept
/// alive for as long as the `Cache` is used; it deletes the directory on drop.
pub fn tmp_cache() -> (TempDir, Cache) {
    let dir = TempDir::new().expect("creating temp dir for test cache");
    let cache = Cache::new(Config::new(dir.path()));
    (dir, cache)
}

pub fn tmp_cache_with(config: impl FnOnce(Config) -> Config) -> (TempDir, Cache) {
    let dir = TempDir::new().expect("creating temp dir for test cache");
    let cache = Cache::new(config(Config::new(dir.path())));
    (dir, cache)
}
