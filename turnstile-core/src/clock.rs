//! Time source for the rate limiter and lockout tracker.
//!
//! All timestamps are milliseconds since the Unix epoch. [`SystemClock`] is used
//! in production; [`MockClock`] lets tests move time explicitly and is available
//! in test builds or with the `test-helpers` feature.

use std::sync::Arc;

use chrono::Utc;

/// A source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by [`chrono::Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    };

    use chrono::Duration;

    use super::Clock;

    /// Controllable clock for deterministic tests.
    ///
    /// Clones share the same underlying time, so advancing one clone advances
    /// every service holding another.
    ///
    /// ```rust,ignore
    /// use turnstile_core::clock::{Clock, MockClock};
    /// use chrono::Duration;
    ///
    /// let clock = MockClock::new(1_000);
    /// clock.advance(Duration::seconds(2));
    /// assert_eq!(clock.now_millis(), 3_000);
    /// ```
    #[derive(Debug, Clone)]
    pub struct MockClock {
        now: Arc<AtomicI64>,
    }

    impl MockClock {
        pub fn new(start_millis: i64) -> Self {
            Self {
                now: Arc::new(AtomicI64::new(start_millis)),
            }
        }

        pub fn advance(&self, by: Duration) {
            self.now.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        pub fn set(&self, millis: i64) {
            self.now.store(millis, Ordering::SeqCst);
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            // 2024-01-01T00:00:00Z
            Self::new(1_704_067_200_000)
        }
    }

    impl Clock for MockClock {
        fn now_millis(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_system_clock_is_close_to_now() {
        let clock = SystemClock::new();
        let drift = (Utc::now().timestamp_millis() - clock.now_millis()).abs();
        assert!(drift < 1_000);
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new(0);
        let shared = clock.clone();

        shared.advance(Duration::minutes(1));
        assert_eq!(clock.now_millis(), 60_000);

        clock.set(5);
        assert_eq!(shared.now_millis(), 5);
    }
}
