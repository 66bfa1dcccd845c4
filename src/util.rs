use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Backoff between non-blocking lock retries (§4.2: "non-blocking retry with ~5ms
/// backoff").
pub const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// Seconds since the Unix epoch, per the "now()" used throughout the spec to compare
/// against L2 filenames and GC timestamps.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

/// Retries `attempt` with [`LOCK_RETRY_BACKOFF`] between tries until it returns
/// `Some(_)` or `deadline` elapses. Mirrors the retry-until-timeout loop the teacher
/// uses for HTTP calls (`net::retry::call_with_retry`), generalized to any
/// non-blocking probe rather than a specific request type.
pub fn retry_until<T>(timeout: Duration, mut attempt: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = attempt() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(LOCK_RETRY_BACKOFF.min(deadline.saturating_duration_since(Instant::now())));
    }
}
