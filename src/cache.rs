use crate::bucket_lock::BucketLock;
use crate::config::Config;
use crate::entry_store::EntryStore;
use crate::gc::GarbageCollector;
use crate::path_resolver::PathResolver;
use crate::prelude::*;
use crate::util::now_epoch;
use crate::value::CacheValue;
use std::fs;
use std::time::Duration;

const PURGE_PREFIX: &str = "__PURGE__";
const WIPE_KEY: &str = "*";

/// Parsed form of the magic-prefixed keys `delete` accepts, parsed once at the
/// boundary instead of re-checking string prefixes throughout the implementation
/// (§9: "re-express as a small tagged command").
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeleteTarget {
    All,
    Purge(String),
    Key(String),
}

impl DeleteTarget {
    fn parse(key: &str) -> DeleteTarget {
        if key == WIPE_KEY {
            DeleteTarget::All
        } else if let Some(rest) = key.strip_prefix(PURGE_PREFIX) {
            DeleteTarget::Purge(rest.to_string())
        } else {
            DeleteTarget::Key(key.to_string())
        }
    }
}

/// Orchestrates `get`/`set`/`delete`/`purge` over [`PathResolver`], [`BucketLock`],
/// and [`EntryStore`], implementing the double-check token protocol and the
/// Delete > Write > Rebuild lock hierarchy (§4.4).
///
/// None of the three public read/write operations ever panics or returns an `Err`
/// to the caller (§7); every failure is logged and absorbed, so a failed `set` is
/// indistinguishable from one that never happened.
pub struct Cache {
    config: Config,
    resolver: PathResolver,
    locks: BucketLock,
}

impl Cache {
    pub fn new(config: Config) -> Cache {
        let resolver = PathResolver::new(config.cache_root.clone());
        let locks = BucketLock::new(config.cache_root.clone());
        Cache {
            config,
            resolver,
            locks,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cache read. Tries L2 first without taking any lock; on a miss, makes a single
    /// short attempt at the rebuild lock to rate-limit stampedes, then falls back to
    /// L1 (§4.4 `get`).
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let dir = self.resolver.data_dir(key)?;
        let bucket = PathResolver::bucket(key)?;

        if let Some(value) = self.try_l2(&dir) {
            return Some(value);
        }

        match self
            .locks
            .acquire_rebuild(&bucket, self.config.rebuild_lock_timeout_ms)
        {
            Some(guard) => {
                trace!("get({:?}): acquired rebuild lock, rate-limiting rebuild", key);
                std::thread::sleep(Duration::from_micros(self.config.get_grace_delay_us));
                drop(guard);
                None
            }
            None => {
                debug!("get({:?}): rebuild lock unavailable, falling back to l1", key);
                self.try_l1(&dir)
            }
        }
    }

    fn try_l2(&self, dir: &Path) -> Option<CacheValue> {
        let now = now_epoch();
        for entry in EntryStore::list_l2(dir) {
            if !self.config.is_never_expire() && entry.epoch < now {
                continue;
            }
            if let Some(value) = EntryStore::read_payload(&entry.path) {
                return Some(value);
            }
        }
        None
    }

    fn try_l1(&self, dir: &Path) -> Option<CacheValue> {
        for entry in EntryStore::list_l1(dir) {
            if let Some(value) = EntryStore::read_payload(&entry.path) {
                return Some(value);
            }
        }
        None
    }

    /// Publishes `value` under `key`, expiring `expire_seconds` from now (`0` means
    /// the configured default TTL). Implements the double-check token protocol
    /// (§4.4 `set`): a concurrent `delete` that completes between the token capture
    /// and the write-lock acquisition causes this call to abort without publishing.
    pub fn set(&self, key: &str, value: &CacheValue, expire_seconds: u64) {
        let dir = match self.resolver.data_dir(key) {
            Some(dir) => dir,
            None => return,
        };
        let bucket = match PathResolver::bucket(key) {
            Some(b) => b,
            None => return,
        };

        let token_before = self.locks.invalidation_token(&bucket);

        if self.config.lag_set_init() {
            // Reproduces the sniper race (S3): sleeping here, right after the token
            // capture and before the write lock is even attempted, gives a
            // concurrent `delete` room to fully complete -- including its token
            // bump -- so this `set` wakes up with a stale `token_before` and aborts
            // via the token-mismatch branch below, the branch the race is meant to
            // exercise.
            std::thread::sleep(Duration::from_secs(3));
        }

        if !self.locks.check_delete(&bucket) {
            debug!("set({:?}): delete in flight, aborting", key);
            return;
        }

        let guard = match self
            .locks
            .acquire_write(&bucket, self.config.write_lock_timeout_ms)
        {
            Some(guard) => guard,
            None => {
                debug!("set({:?}): could not acquire write lock, aborting", key);
                return;
            }
        };

        if !self.locks.check_delete(&bucket) {
            debug!("set({:?}): delete became active under write lock, aborting", key);
            drop(guard);
            return;
        }

        let token_now = self.locks.invalidation_token(&bucket);
        if token_now != token_before {
            debug!("set({:?}): aborting, {}", key, CacheError::TokenMismatch(dir.clone()));
            drop(guard);
            return;
        }

        if let Err(err) = fs::create_dir_all(&dir) {
            warn!("set({:?}): aborting, {}", key, CacheError::Io(dir.clone(), err));
            drop(guard);
            return;
        }

        // The entry about to be published supersedes every existing L2, so once the
        // retention threshold is met this drops all of them rather than keeping one
        // -- the new publish is what leaves exactly one L2 behind (inv. 4).
        let existing = EntryStore::list_l2(&dir);
        if existing.len() >= self.config.max_stale_files {
            EntryStore::prune_older(&existing, 0);
        }

        let expire = if expire_seconds == 0 {
            self.config.expire
        } else {
            expire_seconds
        };
        let epoch = now_epoch() + expire;

        if let Err(err) = EntryStore::publish(&dir, epoch, value) {
            warn!("set({:?}): failed to publish: {:#}", key, err);
        }

        drop(guard);
    }

    /// Dispatches on the magic key forms, then invalidates a single key with
    /// L2 -> L1 promotion (§4.4 `delete`).
    pub fn delete(&self, key: &str) {
        match DeleteTarget::parse(key) {
            DeleteTarget::All => self.wipe_all(),
            DeleteTarget::Purge(inner) => self.purge(&inner),
            DeleteTarget::Key(key) => self.delete_key(&key),
        }
    }

    fn wipe_all(&self) {
        info!("delete(\"*\"): wiping entire cache root");
        let root = self.resolver.cache_root();
        if let Ok(read_dir) = fs::read_dir(root) {
            for entry in read_dir.filter_map(|e| e.ok()) {
                let path = entry.path();
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                if let Err(err) = result {
                    warn!("wipe: could not remove {:?}: {}", path, err);
                }
            }
        }
    }

    fn delete_key(&self, key: &str) {
        let dir = match self.resolver.data_dir(key) {
            Some(dir) => dir,
            None => return,
        };
        let bucket = match PathResolver::bucket(key) {
            Some(b) => b,
            None => return,
        };

        let delete_guard = self
            .locks
            .acquire_delete(&bucket, self.config.delete_lock_timeout_ms);
        if delete_guard.is_none() {
            warn!("delete({:?}): timed out acquiring delete lock, proceeding best-effort", key);
        }

        self.locks.mark_invalidation(&bucket);

        let write_guard = match self
            .locks
            .acquire_write(&bucket, self.config.delete_lock_timeout_ms)
        {
            Some(guard) => guard,
            None => {
                warn!("delete({:?}): could not acquire write lock, aborting", key);
                return;
            }
        };

        let rebuild_guard = self
            .locks
            .acquire_rebuild(&bucket, self.config.rebuild_lock_timeout_ms);

        promote_or_retain(&dir);

        drop(rebuild_guard);
        drop(write_guard);
        drop(delete_guard);
    }

    /// Same lock protocol as `delete_key`, but unlinks every payload (both L2 and
    /// L1) instead of promoting, and may remove emptied non-bucket intermediate
    /// directories.
    pub fn purge(&self, key: &str) {
        let dir = match self.resolver.data_dir(key) {
            Some(dir) => dir,
            None => return,
        };
        let bucket = match PathResolver::bucket(key) {
            Some(b) => b,
            None => return,
        };

        let delete_guard = self
            .locks
            .acquire_delete(&bucket, self.config.delete_lock_timeout_ms);
        if delete_guard.is_none() {
            warn!("purge({:?}): timed out acquiring delete lock, proceeding best-effort", key);
        }

        self.locks.mark_invalidation(&bucket);

        let write_guard = match self
            .locks
            .acquire_write(&bucket, self.config.delete_lock_timeout_ms)
        {
            Some(guard) => guard,
            None => {
                warn!("purge({:?}): could not acquire write lock, aborting", key);
                return;
            }
        };

        let rebuild_guard = self
            .locks
            .acquire_rebuild(&bucket, self.config.rebuild_lock_timeout_ms);

        unlink_everything(&dir);

        drop(rebuild_guard);
        drop(write_guard);
        drop(delete_guard);
    }

    /// Runs the gated garbage collector described in §4.5. Intended to be called
    /// once at engine teardown -- see the design note in SPEC_FULL.md §9 on why this
    /// is an explicit method rather than a `Drop` impl.
    pub fn shutdown(&self) {
        GarbageCollector::new(&self.config, &self.resolver, &self.locks).run();
    }
}

/// Per-directory swap used by `delete`: promote the newest L2 (if any) to L1 and
/// drop the rest; otherwise keep only the newest pre-existing L1. Recurses into
/// subdirectories depth-first but never removes directories (inv. 5).
fn promote_or_retain(dir: &Path) {
    let l2 = EntryStore::list_l2(dir);
    let l1 = EntryStore::list_l1(dir);

    if let Some(newest) = l2.first() {
        // Drop every pre-existing L1 *before* promoting, not after: `publish`
        // seeds `l1-<epoch>` with the same epoch it writes to L2, so promoting
        // first can rename the new L2 onto a path this prune would then unlink
        // out from under it.
        EntryStore::prune_older(&l1, 0);
        EntryStore::promote_l2_to_l1(newest);
        EntryStore::prune_older(&l2, 1);
    } else {
        EntryStore::prune_older(&l1, 1);
    }

    recurse(dir, promote_or_retain);
}

/// Per-directory unlink used by `purge`: every L2 and L1 payload is removed.
fn unlink_everything(dir: &Path) {
    EntryStore::prune_older(&EntryStore::list_l2(dir), 0);
    EntryStore::prune_older(&EntryStore::list_l1(dir), 0);
    recurse(dir, unlink_everything);
}

fn recurse(dir: &Path, visit: fn(&Path)) {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return,
    };
    for entry in read_dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            visit(&path);
        }
    }
}
