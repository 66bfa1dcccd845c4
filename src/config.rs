use crate::prelude::*;

/// TTL sentinel (seconds) meaning "never expire". Kept as the literal value from the
/// source behavior this engine replaces; see `Config::never_expire`.
pub const NEVER_EXPIRE_SENTINEL: u64 = 3601;

/// Recognized `test_mode` values (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestMode {
    /// Injects a sleep inside `set`, after the token is captured but before the
    /// write lock is acquired, to deterministically reproduce the sniper race (S3).
    LagSetInit,
    /// Bypasses the GC interval and hour-window gates.
    ForceGc,
}

/// All tunables from spec §6, plus the cache root.
///
/// This is a plain struct with a `Default` impl and a handful of `with_*` builder
/// methods, matching the teacher's preference for ordinary structs over
/// macro-generated builders (see e.g. `vocab::Requirement`). There is no implicit
/// global configuration; every `Cache` is handed one explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_root: PathBuf,

    /// Default TTL in seconds, added to `now()` to form an L2 filename.
    pub expire: u64,

    pub gc_interval: u64,
    pub gc_start_hour: u32,
    pub gc_end_hour: u32,

    pub rebuild_lock_timeout_ms: u64,
    pub write_lock_timeout_ms: u64,
    pub delete_lock_timeout_ms: u64,

    pub get_grace_delay_us: u64,

    pub max_stale_files: usize,
    pub dir_prune_threshold: usize,

    pub test_mode: Option<TestMode>,
}

impl Config {
    pub fn new(cache_root: impl Into<PathBuf>) -> Config {
        Config {
            cache_root: cache_root.into(),
            expire: 3600,
            gc_interval: 43_200,
            gc_start_hour: 0,
            gc_end_hour: 6,
            rebuild_lock_timeout_ms: 10,
            write_lock_timeout_ms: 100,
            delete_lock_timeout_ms: 60_000,
            get_grace_delay_us: 20_000,
            max_stale_files: 1,
            dir_prune_threshold: 15_000,
            test_mode: None,
        }
    }

    pub fn with_expire(mut self, seconds: u64) -> Config {
        self.expire = seconds;
        self
    }

    /// Convenience for the `expire == 3601` sentinel described in §6, so call sites
    /// don't need to know the magic number.
    pub fn never_expire(mut self) -> Config {
        self.expire = NEVER_EXPIRE_SENTINEL;
        self
    }

    pub fn is_never_expire(&self) -> bool {
        self.expire == NEVER_EXPIRE_SENTINEL
    }

    pub fn with_gc_interval(mut self, seconds: u64) -> Config {
        self.gc_interval = seconds;
        self
    }

    pub fn with_gc_hours(mut self, start: u32, end: u32) -> Config {
        self.gc_start_hour = start;
        self.gc_end_hour = end;
        self
    }

    pub fn with_test_mode(mut self, mode: TestMode) -> Config {
        self.test_mode = Some(mode);
        self
    }

    pub fn lag_set_init(&self) -> bool {
        self.test_mode == Some(TestMode::LagSetInit)
    }

    pub fn force_gc(&self) -> bool {
        self.test_mode == Some(TestMode::ForceGc)
    }
}
