//! Sliding-window rate limiter.
//!
//! Each bucket key holds an exact log of event timestamps. A check counts the
//! events inside the trailing window and, if the bucket has room, records the
//! new event in the same atomic step. There is no fixed-window reset, so a
//! burst straddling a window boundary is still counted in full.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Duration;
//! use turnstile_core::clock::SystemClock;
//! use turnstile_core::repositories::MemoryAttemptLog;
//! use turnstile_core::services::{RateDecision, RateLimiter};
//!
//! let limiter = RateLimiter::new(Arc::new(MemoryAttemptLog::new()), Arc::new(SystemClock));
//!
//! let decision = limiter.check_rate("login:alice@example.com", Duration::minutes(30), 10);
//! assert_eq!(decision, RateDecision::Allow { count: 1 });
//! ```

use std::sync::Arc;

use chrono::Duration;

use crate::{
    clock::Clock,
    error::LimitError,
    repositories::{Admission, AttemptLogRepository},
    validation::validate_bucket_key,
};

/// Result of a single rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The event was recorded; `count` is the bucket size including it.
    Allow { count: u32 },
    /// The bucket already held `limit` events inside the window.
    Deny { limit: u32 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow { .. })
    }
}

/// Service for sliding-window rate limiting over arbitrary bucket keys.
///
/// # Thread Safety
///
/// The service is safe to share across threads and tasks. Concurrent checks on
/// the same key are serialised by the repository, so a bucket never admits more
/// than `limit` events per window.
pub struct RateLimiter<R: AttemptLogRepository> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: AttemptLogRepository> RateLimiter<R> {
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Check a bucket and record the event if it is under its limit.
    ///
    /// Events older than `now - window` are discarded first. If the remaining
    /// count is at least `limit` the call returns [`RateDecision::Deny`] without
    /// recording anything.
    ///
    /// A malformed key or a non-positive window is denied.
    pub fn check_rate(&self, bucket_key: &str, window: Duration, limit: u32) -> RateDecision {
        if let Err(e) = validate_bucket_key(bucket_key) {
            tracing::warn!(error = %e, "Rejected rate limit check with malformed bucket key");
            return RateDecision::Deny { limit };
        }

        if window <= Duration::zero() {
            tracing::warn!(
                window_ms = window.num_milliseconds(),
                "Rejected rate limit check with non-positive window"
            );
            return RateDecision::Deny { limit };
        }

        let now = self.clock.now_millis();
        match self.repository.admit(bucket_key, now, window, limit) {
            Admission::Admitted { count } => RateDecision::Allow {
                count: u32::try_from(count).unwrap_or(u32::MAX),
            },
            Admission::Rejected { count } => {
                tracing::debug!(
                    count = count,
                    limit = limit,
                    window_ms = window.num_milliseconds(),
                    "Rate limit bucket is full"
                );
                RateDecision::Deny { limit }
            }
        }
    }

    /// [`check_rate`](Self::check_rate) as a `Result`.
    pub fn check_rate_limit(
        &self,
        bucket_key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<(), LimitError> {
        match self.check_rate(bucket_key, window, limit) {
            RateDecision::Allow { .. } => Ok(()),
            RateDecision::Deny { limit } => {
                tracing::warn!(
                    event = "rate_limited",
                    limit = limit,
                    window_ms = window.num_milliseconds(),
                    "Rate limit exceeded"
                );
                Err(LimitError::rate_limited())
            }
        }
    }

    /// Number of events currently inside `window` for a bucket, without recording.
    pub fn bucket_count(&self, bucket_key: &str, window: Duration) -> u32 {
        let count = self
            .repository
            .count_within(bucket_key, self.clock.now_millis(), window);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Delete all state for one bucket.
    pub fn clear_bucket(&self, bucket_key: &str) {
        if self.repository.remove(bucket_key) {
            tracing::debug!("Cleared rate limit bucket");
        }
    }

    /// Delete every bucket.
    pub fn clear_all(&self) {
        self.repository.clear();
        tracing::info!("Cleared all rate limit buckets");
    }

    /// Drop expired events from every bucket. Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        self.repository.sweep(self.clock.now_millis())
    }

    /// Number of buckets currently held.
    pub fn bucket_total(&self) -> usize {
        self.repository.len()
    }
}
