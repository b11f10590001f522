//! Service layer for the leaf components
//!
//! This module contains the rate limiter and the lockout tracker. Both hold
//! their state in an [`AttemptLogRepository`](crate::repositories::AttemptLogRepository).

pub mod lockout;
pub mod rate_limiter;

pub use lockout::{LockoutState, LockoutStatus, LockoutTracker, THROTTLED_MESSAGE};
pub use rate_limiter::{RateDecision, RateLimiter};
