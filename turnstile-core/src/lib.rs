//! Core functionality for the turnstile project
//!
//! This crate contains the two leaf components of the abuse-prevention core:
//!
//! - [`RateLimiter`]: an exact sliding-window log over arbitrary bucket keys
//! - [`LockoutTracker`]: progressive lockout derived from recent authentication failures
//!
//! Both keep their state in an [`AttemptLogRepository`]; [`MemoryAttemptLog`] is the
//! in-process implementation. The policy layer in the `turnstile` crate composes them
//! into per-operation checks.
//!
//! State is ephemeral and lives only as long as the owning service value.
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod repositories;
pub mod services;
pub mod validation;

pub use clock::{Clock, SystemClock};
pub use config::LockoutConfig;
pub use error::{ConfigError, Error, LimitError};
pub use events::{Event, EventBus, UnlockReason};
pub use repositories::{Admission, AttemptLogRepository, MemoryAttemptLog};
pub use services::{LockoutState, LockoutStatus, LockoutTracker, RateDecision, RateLimiter};

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::MockClock;
