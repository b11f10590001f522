//! # Turnstile
//!
//! Turnstile is the abuse-prevention core of a scheduling application. It
//! combines an exact sliding-window rate limiter with progressive account
//! lockout, and composes them into one throttling policy per protected
//! operation:
//!
//! - Authentication, with lockout after repeated failures
//! - Signup, password reset and email verification
//! - OAuth initiation, callback and account completion
//! - Username changes, payment initiation and calendar/video connection tests
//!
//! Each policy checks several dimensions (identifier, email, IP, user) over
//! cascading windows and fails closed on the first violation.
//!
//! ## Warning
//!
//! All state is held in memory and is lost when the process exits. Limits are
//! enforced per process; there is no coordination between nodes.
//!
//! ## Example
//!
//! ```rust
//! use turnstile::{Turnstile, TurnstileConfig};
//!
//! let turnstile = Turnstile::new(TurnstileConfig::default()).unwrap();
//!
//! // Before verifying credentials
//! turnstile.check_authentication("alice@example.com", Some("203.0.113.5")).unwrap();
//!
//! // After verifying them
//! turnstile.record_authentication("alice@example.com", false).unwrap();
//! assert_eq!(turnstile.lockout().get_failed_attempt_count("alice@example.com"), 1);
//! ```
use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use turnstile_core::{Clock, LockoutTracker, RateLimiter};

pub mod builder;
pub mod config;
pub mod policy;

pub use builder::TurnstileBuilder;
pub use config::{PaymentLimits, TurnstileConfig};
pub use policy::{Dimension, Operation, PolicyTable, Tier};

/// Re-export core types from turnstile_core
pub use turnstile_core::{
    AttemptLogRepository, ConfigError, Error, Event, EventBus, LimitError, LockoutConfig,
    LockoutState, LockoutStatus, MemoryAttemptLog, RateDecision, UnlockReason,
};

/// The abuse-prevention service.
///
/// Owns the rate limit buckets and the failed-attempt history. Construct one
/// at process start and share it; every method takes `&self` and is safe to
/// call from any thread.
///
/// Checks are synchronous. [`start_sweeper`](Self::start_sweeper) optionally
/// runs a background task that prunes expired state, which otherwise happens
/// lazily whenever a key is touched.
pub struct Turnstile<R: AttemptLogRepository = MemoryAttemptLog> {
    config: TurnstileConfig,
    policies: PolicyTable,
    rate_limiter: Arc<RateLimiter<R>>,
    lockout: Arc<LockoutTracker<R>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    shutdown: watch::Sender<bool>,
}

impl Turnstile<MemoryAttemptLog> {
    /// Create an in-memory service with the given configuration
    pub fn new(config: TurnstileConfig) -> Result<Self, ConfigError> {
        TurnstileBuilder::new().with_config(config).build()
    }

    pub fn builder() -> TurnstileBuilder<MemoryAttemptLog> {
        TurnstileBuilder::new()
    }
}

impl<R: AttemptLogRepository> Turnstile<R> {
    pub fn config(&self) -> &TurnstileConfig {
        &self.config
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// The underlying rate limiter, for buckets outside the built-in policies
    pub fn rate_limiter(&self) -> &RateLimiter<R> {
        &self.rate_limiter
    }

    pub fn lockout(&self) -> &LockoutTracker<R> {
        &self.lockout
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to security events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Start the background sweeper.
    ///
    /// Every `sweep_interval` the task drops expired events from both stores.
    /// It stops when [`shutdown`](Self::shutdown) is called or the service is
    /// dropped. Must be called from within a tokio runtime.
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let lockout = Arc::clone(&self.lockout);
        let period = self.config.sweep_interval;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }

            let mut interval_timer = tokio::time::interval(period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let buckets = rate_limiter.sweep();
                        let identifiers = lockout.sweep();
                        if buckets > 0 || identifiers > 0 {
                            tracing::debug!(
                                buckets = buckets,
                                identifiers = identifiers,
                                "Swept expired rate limit state"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Shutting down turnstile sweeper");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Stop the background sweeper. Calling this more than once is harmless.
    ///
    /// Checks keep working after shutdown; expired state is still pruned
    /// whenever a key is read or written.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::debug!("Turnstile shutdown requested");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
