//! Builder for constructing [`Turnstile`] instances
//!
//! The builder starts from in-memory stores, the system clock and the
//! compiled-in policies. Each can be replaced before [`TurnstileBuilder::build`]
//! validates the result.
//!
//! # Example
//!
//! ```rust
//! use chrono::Duration;
//! use turnstile::{Dimension, Operation, Tier, TurnstileBuilder};
//!
//! let turnstile = TurnstileBuilder::new()
//!     .with_payment_limits(5, Duration::minutes(30))
//!     .with_tiers(
//!         Operation::PasswordResetForm,
//!         Dimension::Ip,
//!         vec![
//!             Tier::new("15m", 5, Duration::minutes(15)),
//!             Tier::new("1h", 20, Duration::hours(1)),
//!         ],
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(turnstile.config().payment.max_attempts, 5);
//! ```

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::watch;
use turnstile_core::{
    AttemptLogRepository, Clock, ConfigError, EventBus, LockoutConfig, LockoutTracker,
    MemoryAttemptLog, RateLimiter, SystemClock,
};

use crate::{
    Turnstile,
    config::TurnstileConfig,
    policy::{Dimension, Operation, PolicyTable, Tier},
};

pub struct TurnstileBuilder<R: AttemptLogRepository = MemoryAttemptLog> {
    config: TurnstileConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    overrides: Vec<(Operation, Dimension, Vec<Tier>)>,
    buckets: Arc<R>,
    failures: Arc<R>,
}

impl Default for TurnstileBuilder<MemoryAttemptLog> {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnstileBuilder<MemoryAttemptLog> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Storage: in-memory, one store for buckets and one for failures
    /// - Clock: system time
    /// - Lockout: throttle at 10 failures, lock at 20
    /// - Payment: 10 attempts per hour
    pub fn new() -> Self {
        Self {
            config: TurnstileConfig::default(),
            clock: Arc::new(SystemClock),
            events: EventBus::default(),
            overrides: Vec::new(),
            buckets: Arc::new(MemoryAttemptLog::new()),
            failures: Arc::new(MemoryAttemptLog::new()),
        }
    }
}

impl<R: AttemptLogRepository> TurnstileBuilder<R> {
    pub fn with_config(mut self, config: TurnstileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_lockout_config(mut self, lockout: LockoutConfig) -> Self {
        self.config.lockout = lockout;
        self
    }

    pub fn with_payment_limits(mut self, max_attempts: u32, window: Duration) -> Self {
        self.config = self.config.with_payment_limits(max_attempts, window);
        self
    }

    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Use a different time source, typically a mock clock in tests
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Publish events on an existing bus instead of a fresh one
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Replace the cascade for one dimension of an operation.
    ///
    /// Payment overrides take precedence over the configured payment limits.
    /// The tiers are validated by [`build`](Self::build).
    pub fn with_tiers(
        mut self,
        operation: Operation,
        dimension: Dimension,
        tiers: Vec<Tier>,
    ) -> Self {
        self.overrides.push((operation, dimension, tiers));
        self
    }

    /// Store buckets and failure history in custom repositories
    pub fn with_repositories<S: AttemptLogRepository>(
        self,
        buckets: Arc<S>,
        failures: Arc<S>,
    ) -> TurnstileBuilder<S> {
        TurnstileBuilder {
            config: self.config,
            clock: self.clock,
            events: self.events,
            overrides: self.overrides,
            buckets,
            failures,
        }
    }

    /// Validate the configuration and build the service.
    pub fn build(self) -> Result<Turnstile<R>, ConfigError> {
        self.config.validate()?;

        let mut policies = PolicyTable::defaults(&self.config.payment);
        for (operation, dimension, tiers) in self.overrides {
            policies.set(operation, dimension, tiers)?;
        }

        let rate_limiter = Arc::new(RateLimiter::new(self.buckets, Arc::clone(&self.clock)));
        let lockout = Arc::new(LockoutTracker::new(
            self.failures,
            Arc::clone(&self.clock),
            self.config.lockout.clone(),
            self.events.clone(),
        ));
        let (shutdown, _) = watch::channel(false);

        tracing::debug!(
            throttle_threshold = self.config.lockout.throttle_threshold,
            lock_threshold = self.config.lockout.lock_threshold,
            payment_max_attempts = self.config.payment.max_attempts,
            "Built turnstile service"
        );

        Ok(Turnstile {
            config: self.config,
            policies,
            rate_limiter,
            lockout,
            clock: self.clock,
            events: self.events,
            shutdown,
        })
    }
}
