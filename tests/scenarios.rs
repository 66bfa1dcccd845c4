//! Integration coverage for the end-to-end scenarios in SPEC_FULL.md §8.
//!
//! These simulate the "multiple independent OS processes" scheduling model with
//! threads and distinct `Cache`/`BucketLock` handles sharing one temp directory --
//! spawning real worker processes is the CLI harness's job, out of scope for the
//! core engine itself (§1).

use filecache_core::{BucketLock, Cache, CacheValue, Config, EntryStore};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn cache_in(dir: &std::path::Path) -> Cache {
    Cache::new(Config::new(dir))
}

/// S1 -- thundering herd on a stale bucket: 10 concurrent `get`s against a key with
/// only an L1 backup must mostly serve the stale value, with at most a couple of
/// callers winning the rebuild-lock race.
#[test]
fn s1_thundering_herd_on_stale_bucket() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let key_dir = dir.path().join("herd");
    let value: CacheValue = "STALE_DATA_L1".into();
    let stale_epoch = now_epoch().saturating_sub(5000);
    EntryStore::publish(&key_dir, stale_epoch, &value).unwrap();
    // only L1 should remain for this scenario's precondition
    EntryStore::prune_older(&EntryStore::list_l2(&key_dir), 0);
    assert!(EntryStore::list_l2(&key_dir).is_empty());

    let cache = Arc::new(cache_in(dir.path()));
    let start = Instant::now();
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get("herd"))
        })
        .collect();
    let results: Vec<Option<CacheValue>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let none_count = results.iter().filter(|r| r.is_none()).count();
    let stale_count = results.iter().filter(|r| r.as_ref() == Some(&value)).count();
    assert!(none_count <= 2, "expected 0-2 rebuilders, got {}", none_count);
    assert!(stale_count >= 8, "expected >=8 stale hits, got {}", stale_count);
    assert!(start.elapsed() < Duration::from_millis(200), "herd should not stall");
}

/// S2 -- a held delete lock must block a concurrent `set` from ever publishing an
/// L2 file, and the blocked `set` must still return promptly (the write-lock
/// timeout, not the delete-lock timeout, bounds it).
#[test]
fn s2_delete_blocks_write() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let locks = BucketLock::new(dir.path());
    let held = locks.acquire_delete("blocked_key", 50).expect("worker A holds delete");

    let cache = cache_in(dir.path());
    let value: CacheValue = "x".into();

    let worker_b = thread::spawn({
        let dir = dir.path().to_path_buf();
        move || {
            thread::sleep(Duration::from_millis(20));
            let cache = Cache::new(Config::new(&dir));
            let start = Instant::now();
            cache.set("blocked_key", &value, 3600);
            start.elapsed()
        }
    });

    thread::sleep(Duration::from_millis(200));
    drop(held);
    let elapsed = worker_b.join().unwrap();

    let key_dir = dir.path().join("blocked_key");
    assert!(EntryStore::list_l2(&key_dir).is_empty());
    assert!(elapsed < Duration::from_millis(500));
    let _ = cache;
}

/// S3 -- sniper race: a `set` that sleeps (under `lag_set_init`) after capturing its
/// invalidation token must lose to a `delete` that lands in that window.
#[test]
fn s3_sniper_race() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let writer_cache = Arc::new(Cache::new(
        Config::new(dir.path())
            .with_test_mode(filecache_core::TestMode::LagSetInit)
            .with_expire(3600),
    ));
    let deleter_cache = Cache::new(Config::new(dir.path()));

    let writer = {
        let cache = Arc::clone(&writer_cache);
        thread::spawn(move || {
            let value: CacheValue = "STALE".into();
            cache.set("race_key", &value, 0);
        })
    };

    thread::sleep(Duration::from_millis(300));
    deleter_cache.delete("race_key");
    writer.join().unwrap();

    let key_dir = dir.path().join("race_key");
    assert!(
        EntryStore::list_l2(&key_dir).is_empty(),
        "writer's value must not have been published across the invalidation boundary"
    );
}

/// S4 -- zombie promotion: an expired L2 with no L1 backup must, after one GC
/// sweep under `force_gc`, become exactly one L1 file carrying the same payload
/// and the original epoch in its name.
#[test]
fn s4_zombie_promotion() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let key_dir = dir.path().join("gc_zombie_test");
    let value: CacheValue = "I AM A ZOMBIE".into();
    let expired_epoch = now_epoch().saturating_sub(3600);
    EntryStore::publish(&key_dir, expired_epoch, &value).unwrap();
    EntryStore::prune_older(&EntryStore::list_l1(&key_dir), 0);
    assert!(EntryStore::list_l1(&key_dir).is_empty());

    let cache = Cache::new(Config::new(dir.path()).with_test_mode(filecache_core::TestMode::ForceGc));
    cache.shutdown();

    assert!(EntryStore::list_l2(&key_dir).is_empty());
    let l1 = EntryStore::list_l1(&key_dir);
    assert_eq!(l1.len(), 1);
    assert_eq!(l1[0].epoch, expired_epoch);
    assert_eq!(EntryStore::read_payload(&l1[0].path), Some(value));
}

/// S5 -- warm L2 fan-out: every concurrent reader of a fresh key must see the
/// same value, with no lock contention and no L1 file created as a side effect.
#[test]
fn s5_warm_l2_fan_out() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let key_dir = dir.path().join("warm_l2");
    let value: CacheValue = "FRESH_L2_DATA".into();
    EntryStore::publish(&key_dir, now_epoch() + 3600, &value).unwrap();
    EntryStore::prune_older(&EntryStore::list_l1(&key_dir), 0);
    assert!(EntryStore::list_l1(&key_dir).is_empty());

    let cache = Arc::new(cache_in(dir.path()));
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get("warm_l2"))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Some(value.clone()));
    }
    assert!(EntryStore::list_l1(&key_dir).is_empty(), "a fresh read must not create an L1 backup");
}

/// S6 -- cold fan-out: every concurrent reader of an absent key must return
/// `None`, and `get` must never create a payload file as a side effect.
#[test]
fn s6_cold_fan_out() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(cache_in(dir.path()));
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get("cold_single_key"))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), None);
    }

    let bucket_dir = dir.path().join("cold_single_key");
    assert!(EntryStore::list_l2(&bucket_dir).is_empty());
    assert!(EntryStore::list_l1(&bucket_dir).is_empty());
}

/// Property 8: purging an already-purged key is a no-op, not an error.
#[test]
fn purge_is_idempotent() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let cache = cache_in(dir.path());
    let value: CacheValue = "v".into();
    cache.set("k", &value, 3600);

    cache.delete("__PURGE__k");
    assert_eq!(cache.get("k"), None);
    cache.delete("__PURGE__k");
    assert_eq!(cache.get("k"), None);
}

/// Property 6: structure is preserved across a mixed sequence of `delete` and
/// `shutdown` (GC) calls -- the key-directory chain must still exist afterward.
#[test]
fn structure_preservation_across_delete_and_gc() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let cache = Cache::new(Config::new(dir.path()).with_test_mode(filecache_core::TestMode::ForceGc));
    let value: CacheValue = "v".into();
    cache.set("product.123.meta", &value, 3600);
    cache.delete("product.123.meta");
    cache.shutdown();

    let key_dir = dir.path().join("product/123/meta");
    assert!(key_dir.exists());
    assert!(dir.path().join("product").exists());
}

/// A global wipe (`delete("*")`) must remove every bucket, but a subsequent `set`
/// must still work -- the wipe doesn't leave the cache root itself unusable.
#[test]
fn global_wipe_then_set_works() {
    env_logger::try_init().ok();
    let dir = tempfile::TempDir::new().unwrap();
    let cache = cache_in(dir.path());
    let value: CacheValue = "v".into();
    cache.set("a.b", &value, 3600);
    cache.set("c.d", &value, 3600);

    cache.delete("*");
    assert_eq!(cache.get("a.b"), None);
    assert_eq!(cache.get("c.d"), None);

    cache.set("a.b", &value, 3600);
    assert_eq!(cache.get("a.b"), Some(value));
}
