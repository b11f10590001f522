//! Repository traits for the attempt-log store
//!
//! Both leaf services keep their state as per-key logs of event timestamps.
//! The rate limiter stores one log per bucket; the lockout tracker stores one
//! log of failures per identifier. [`AttemptLogRepository`] is the seam between
//! those services and the storage, and [`MemoryAttemptLog`] is the in-process
//! implementation used by the service.

pub mod memory;

pub use memory::MemoryAttemptLog;

use chrono::Duration;

/// Outcome of an atomic check-then-record against one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was recorded; `count` includes it.
    Admitted { count: usize },
    /// The window was already full; nothing was recorded.
    Rejected { count: usize },
}

/// Storage for timestamp logs keyed by an opaque string.
///
/// Every method acts on a single key. Implementations must execute each call
/// as one indivisible step for that key: two concurrent [`admit`] calls on the
/// same key are never allowed to observe the same count.
///
/// Logs remember the largest window they were evaluated against and drop
/// entries older than that horizon whenever they are touched. A log that
/// becomes empty is removed.
///
/// [`admit`]: AttemptLogRepository::admit
pub trait AttemptLogRepository: Send + Sync + 'static {
    /// Record `now_ms` under `key` if fewer than `limit` entries fall inside
    /// `[now_ms - window, now_ms]`.
    fn admit(&self, key: &str, now_ms: i64, window: Duration, limit: u32) -> Admission;

    /// Unconditionally record `now_ms` under `key` and return the number of
    /// entries inside `window`.
    ///
    /// Entries are kept for `retention`, but only the newest `max_entries`
    /// survive, so the returned count saturates at `max_entries`.
    fn record(
        &self,
        key: &str,
        now_ms: i64,
        retention: Duration,
        window: Duration,
        max_entries: usize,
    ) -> usize;

    /// Number of entries inside `[now_ms - window, now_ms]`, pruning stale entries.
    fn count_within(&self, key: &str, now_ms: i64, window: Duration) -> usize;

    /// Delete the log for `key`. Returns `true` if one existed.
    fn remove(&self, key: &str) -> bool;

    /// Delete the log for `key` and return how many of its entries fell inside
    /// `[now_ms - window, now_ms]`, or `None` if there was no log.
    fn take(&self, key: &str, now_ms: i64, window: Duration) -> Option<usize>;

    /// Delete every log.
    fn clear(&self);

    /// Number of keys currently holding a log.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prune every log against its own horizon and drop the empty ones.
    ///
    /// Returns the number of keys removed.
    fn sweep(&self, now_ms: i64) -> usize;
}
