use crate::bucket_lock::BucketLock;
use crate::config::Config;
use crate::entry_store::EntryStore;
use crate::path_resolver::PathResolver;
use crate::prelude::*;
use crate::util::now_epoch;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::time::{SystemTime, UNIX_EPOCH};

const GC_CONTROL_FILE: &str = "gc-control";

/// Time-gated, single-flight, whole-cache sweep (§4.5). Runs synchronously inside
/// [`crate::Cache::shutdown`] -- never via a destructor, see SPEC_FULL.md §9.
pub struct GarbageCollector<'a> {
    config: &'a Config,
    resolver: &'a PathResolver,
    locks: &'a BucketLock,
}

impl<'a> GarbageCollector<'a> {
    pub fn new(
        config: &'a Config,
        resolver: &'a PathResolver,
        locks: &'a BucketLock,
    ) -> GarbageCollector<'a> {
        GarbageCollector {
            config,
            resolver,
            locks,
        }
    }

    pub fn run(&self) {
        if self.config.is_never_expire() {
            trace!("gc: skipped, never-expire mode");
            return;
        }

        if !self.config.force_gc() && !self.within_hour_window() {
            debug!(
                "gc: skipped, current hour outside [{}, {}]",
                self.config.gc_start_hour, self.config.gc_end_hour
            );
            return;
        }

        let control_path = self.resolver.cache_root().join(GC_CONTROL_FILE);
        if let Some(parent) = control_path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!("gc: {}", CacheError::Io(parent.to_path_buf(), err));
                return;
            }
        }

        let control_file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&control_path)
        {
            Ok(f) => f,
            Err(err) => {
                warn!("gc: {}", CacheError::Io(control_path, err));
                return;
            }
        };

        if FileExt::try_lock_exclusive(&control_file).is_err() {
            debug!("gc: another process holds the control lock, skipping");
            return;
        }

        let last_run = read_control(&control_file);
        let now = now_epoch();
        if !self.config.force_gc() && now.saturating_sub(last_run) < self.config.gc_interval {
            debug!(
                "gc: last ran {}s ago, interval is {}s, skipping",
                now.saturating_sub(last_run),
                self.config.gc_interval
            );
            let _ = FileExt::unlock(&control_file);
            return;
        }

        // Write `now` back immediately so a subsequent attempt in the next interval
        // sees a fresh timestamp even if this run fails partway through.
        write_control(&control_file, now);

        info!("gc: sweep starting");
        let mut swept = 0usize;
        for bucket in self.list_buckets() {
            self.sweep_bucket(&bucket, now);
            swept += 1;
        }
        info!("gc: sweep complete, {} buckets visited", swept);

        let _ = FileExt::unlock(&control_file);
    }

    fn within_hour_window(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let hour = ((now / 3600) % 24) as u32;
        if self.config.gc_start_hour <= self.config.gc_end_hour {
            hour >= self.config.gc_start_hour && hour <= self.config.gc_end_hour
        } else {
            // wraps past midnight, e.g. start=22, end=4
            hour >= self.config.gc_start_hour || hour <= self.config.gc_end_hour
        }
    }

    fn list_buckets(&self) -> Vec<String> {
        let read_dir = match fs::read_dir(self.resolver.cache_root()) {
            Ok(rd) => rd,
            Err(_) => return Vec::new(),
        };
        read_dir
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect()
    }

    fn sweep_bucket(&self, bucket: &str, now: u64) {
        let delete_guard = self
            .locks
            .acquire_delete(bucket, self.config.delete_lock_timeout_ms);
        if delete_guard.is_none() {
            debug!("gc: could not acquire delete lock for bucket {:?}, skipping", bucket);
            return;
        }
        self.locks.mark_invalidation(bucket);

        let write_guard = self
            .locks
            .acquire_write(bucket, self.config.write_lock_timeout_ms);
        if write_guard.is_none() {
            debug!("gc: could not acquire write lock for bucket {:?}, skipping", bucket);
            return;
        }

        let rebuild_guard = self
            .locks
            .acquire_rebuild(bucket, self.config.rebuild_lock_timeout_ms);

        let bucket_dir = self.resolver.bucket_dir(bucket);
        let entry_count = count_entries(&bucket_dir);
        let prune_dirs = entry_count > self.config.dir_prune_threshold;

        zombie_sweep(&bucket_dir, now, prune_dirs);

        drop(rebuild_guard);
        drop(write_guard);
        drop(delete_guard);
    }
}

fn read_control(file: &std::fs::File) -> u64 {
    use std::io::Read;
    let mut contents = String::new();
    let mut file = file.try_clone().expect("control file handle should be clonable");
    if file.read_to_string(&mut contents).is_err() {
        return 0;
    }
    contents.trim().parse().unwrap_or(0)
}

fn write_control(file: &std::fs::File, value: u64) {
    use std::io::{Seek, SeekFrom, Write};
    let mut file = match file.try_clone() {
        Ok(f) => f,
        Err(_) => return,
    };
    let _ = file.set_len(0);
    let _ = file.seek(SeekFrom::Start(0));
    let _ = file.write_all(value.to_string().as_bytes());
    let _ = file.sync_all();
}

/// Zombie promotion (§4.5 step 6): the newest expired L2 is demoted to L1 instead of
/// destroyed; every other L2 is unlinked; all but the newest L1 is unlinked. Valid
/// (non-expired) newest L2 is left alone, with siblings pruned.
fn zombie_sweep(dir: &Path, now: u64, prune_empty_dirs: bool) {
    let l2 = EntryStore::list_l2(dir);
    let l1 = EntryStore::list_l1(dir);

    if let Some(newest) = l2.first() {
        if newest.epoch < now {
            EntryStore::promote_l2_to_l1(newest);
            EntryStore::prune_older(&l2, 1);
        } else {
            EntryStore::prune_older(&l2, 1);
        }
    }
    EntryStore::prune_older(&l1, 1);

    recurse_and_sweep(dir, now, prune_empty_dirs);
}

fn recurse_and_sweep(dir: &Path, now: u64, prune_empty_dirs: bool) {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return,
    };
    for entry in read_dir.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        zombie_sweep(&path, now, prune_empty_dirs);
        if prune_empty_dirs && is_empty_dir(&path) {
            if let Err(err) = fs::remove_dir(&path) {
                debug!("gc: could not prune empty directory {:?}: {}", path, err);
            }
        }
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut rd| rd.next().is_none()).unwrap_or(false)
}

fn count_entries(dir: &Path) -> usize {
    walk_count(dir)
}

fn walk_count(dir: &Path) -> usize {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return 0,
    };
    let mut count = 0;
    for entry in read_dir.filter_map(|e| e.ok()) {
        count += 1;
        let path = entry.path();
        if path.is_dir() {
            count += walk_count(&path);
        }
    }
    count
}
