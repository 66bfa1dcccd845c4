#![forbid(unsafe_code)]

//! A concurrent, filesystem-backed key/value cache engine.
//!
//! Drop-in replacement for a web application's native file-cache driver: large
//! catalogs, heavy multi-process read load, no coordinating daemon. See
//! `SPEC_FULL.md` for the full design; in short, lookups are O(1) via deterministic
//! path construction, availability survives invalidation storms through a two-tier
//! fresh/stale (L2/L1) layout, and a three-level lock hierarchy (Delete > Write >
//! Rebuild) keeps concurrent writers, deleters, and rebuilders from corrupting each
//! other's work.

pub mod bucket_lock;
pub mod cache;
pub mod config;
pub mod entry_store;
pub mod error;
pub mod gc;
pub mod path_resolver;
pub mod prelude;
pub mod util;
pub mod value;

#[cfg(test)]
mod test_util;

pub use bucket_lock::{BucketLock, LockGuard, LockKind};
pub use cache::Cache;
pub use config::{Config, TestMode};
pub use entry_store::{Entry, EntryStore};
pub use error::CacheError;
pub use path_resolver::PathResolver;
pub use value::CacheValue;
