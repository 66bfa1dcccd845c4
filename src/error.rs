use std::path::PathBuf;
use thiserror::Error;

/// Structured failure kinds for diagnostics.
///
/// None of these ever reach a caller of [`crate::Cache::get`], [`crate::Cache::set`],
/// or [`crate::Cache::delete`] — the three public operations absorb every variant and
/// log it instead, per the "never raise" propagation policy. The enum exists so the
/// debug log can say *why* an operation degraded instead of just *that* it did.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("timed out acquiring {lock} lock for bucket {bucket:?} after {timeout_ms}ms")]
    LockTimeout {
        lock: &'static str,
        bucket: String,
        timeout_ms: u64,
    },

    #[error("could not create bucket directory {0:?}")]
    BucketDirUnavailable(PathBuf),

    #[error("invalidation token changed while publishing {0:?} (concurrent delete)")]
    TokenMismatch(PathBuf),

    #[error("failed to publish entry at {0:?}: {1}")]
    PublishFailed(PathBuf, #[source] std::io::Error),

    #[error("failed to decode payload at {0:?}")]
    DecodeFailed(PathBuf),

    #[error("filesystem operation on {0:?} failed: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}
