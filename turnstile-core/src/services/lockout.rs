//! Progressive account lockout.
//!
//! Only raw failure timestamps are stored. Whether an identifier is open,
//! throttled or locked is recomputed on every call from the failures inside
//! the decision window (one hour by default), so a lock decays on its own as
//! old failures age out. There is no separate "locked until" record to expire.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile_core::clock::SystemClock;
//! use turnstile_core::config::LockoutConfig;
//! use turnstile_core::events::EventBus;
//! use turnstile_core::repositories::MemoryAttemptLog;
//! use turnstile_core::services::LockoutTracker;
//!
//! let tracker = LockoutTracker::new(
//!     Arc::new(MemoryAttemptLog::new()),
//!     Arc::new(SystemClock),
//!     LockoutConfig::default(),
//!     EventBus::default(),
//! );
//!
//! // Record a failed attempt after authentication failure
//! assert!(tracker.check_and_record_attempt("user@example.com", false).is_ok());
//! assert_eq!(tracker.get_failed_attempt_count("user@example.com"), 1);
//!
//! // A successful login clears the history
//! tracker.check_and_record_attempt("user@example.com", true).unwrap();
//! assert_eq!(tracker.get_failed_attempt_count("user@example.com"), 0);
//! ```

use std::sync::Arc;

use serde::Serialize;

use crate::{
    clock::Clock,
    config::LockoutConfig,
    error::LimitError,
    events::{Event, EventBus, UnlockReason, timestamp},
    repositories::AttemptLogRepository,
    validation::normalize_identifier,
};

/// Message returned while an identifier is throttled.
pub const THROTTLED_MESSAGE: &str = "Too many failed attempts. Please wait before trying again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockoutState {
    Open,
    Throttled,
    Locked,
}

/// Lockout state of one identifier, derived from its failure history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
    pub identifier: String,
    pub state: LockoutState,
    /// Failures inside the decision window
    pub recent_failures: u32,
    /// Failures inside the retention period
    pub failed_attempts: u32,
    /// Informational lock duration, set only while locked
    pub lockout_minutes: Option<u32>,
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        self.state == LockoutState::Locked
    }

    pub fn is_throttled(&self) -> bool {
        self.state == LockoutState::Throttled
    }
}

/// Service tracking failed authentication attempts per identifier.
///
/// Identifiers are normalised (trimmed and lowercased) before use, so
/// `Alice@Example.com` and `alice@example.com` share one history.
///
/// # Thread Safety
///
/// This service is thread-safe and can be shared across multiple tasks.
/// The underlying repository serialises updates per identifier.
pub struct LockoutTracker<R: AttemptLogRepository> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    config: LockoutConfig,
    events: EventBus,
}

impl<R: AttemptLogRepository> LockoutTracker<R> {
    pub fn new(
        repository: Arc<R>,
        clock: Arc<dyn Clock>,
        config: LockoutConfig,
        events: EventBus,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
            events,
        }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Record the outcome of an authentication attempt and evaluate the lockout.
    ///
    /// A success clears the failure history and returns `Ok`. A failure is
    /// recorded first and the resulting state decides the return value, so the
    /// attempt that crosses a threshold is itself denied.
    pub fn check_and_record_attempt(
        &self,
        identifier: &str,
        success: bool,
    ) -> Result<(), LimitError> {
        let identifier = self.normalize(identifier)?;

        if success {
            self.unlock_normalized(&identifier, UnlockReason::SuccessfulLogin);
            return Ok(());
        }

        let now = self.clock.now_millis();
        let recent = self.repository.record(
            &identifier,
            now,
            self.config.retention,
            self.config.decision_window,
            self.config.max_recorded_failures() as usize,
        );
        let recent = u32::try_from(recent).unwrap_or(u32::MAX);

        self.events.emit(Event::LoginFailed {
            identifier: identifier.clone(),
            recent_failures: recent,
            timestamp: timestamp(now),
        });

        // Escalation events fire once, on the attempt that crosses the threshold
        if recent == self.config.throttle_threshold {
            self.events.emit(Event::AccountThrottled {
                identifier: identifier.clone(),
                recent_failures: recent,
                timestamp: timestamp(now),
            });
        } else if recent == self.config.lock_threshold {
            tracing::warn!(
                event = "account_locked",
                failed_attempts = recent,
                lockout_minutes = self.lockout_minutes(recent),
                "Account lockout escalated"
            );
            self.events.emit(Event::AccountLocked {
                identifier: identifier.clone(),
                recent_failures: recent,
                lockout_minutes: self.lockout_minutes(recent),
                timestamp: timestamp(now),
            });
        }

        self.verdict(recent)
    }

    /// Evaluate the lockout without recording anything.
    pub fn check_lockout_status(&self, identifier: &str) -> Result<(), LimitError> {
        let identifier = self.normalize(identifier)?;
        let recent = self.count(&identifier, self.config.decision_window);
        self.verdict(recent)
    }

    /// Full lockout status for diagnostics and reporting.
    pub fn lockout_status(&self, identifier: &str) -> Result<LockoutStatus, LimitError> {
        let identifier = self.normalize(identifier)?;
        let recent = self.count(&identifier, self.config.decision_window);
        let failed_attempts = self.count(&identifier, self.config.retention);
        let state = self.state(recent);

        Ok(LockoutStatus {
            identifier,
            state,
            recent_failures: recent,
            failed_attempts,
            lockout_minutes: (state == LockoutState::Locked).then(|| self.lockout_minutes(recent)),
        })
    }

    /// Failures recorded in the retention period (24 hours by default).
    ///
    /// Malformed identifiers have no history and report `0`.
    pub fn get_failed_attempt_count(&self, identifier: &str) -> u32 {
        match self.normalize(identifier) {
            Ok(identifier) => self.count(&identifier, self.config.retention),
            Err(_) => 0,
        }
    }

    /// Clear an identifier's failure history (operator action).
    pub fn clear_failed_attempts(&self, identifier: &str) {
        if let Ok(identifier) = self.normalize(identifier) {
            self.unlock_normalized(&identifier, UnlockReason::AdminAction);
        }
    }

    /// Clear an identifier's failure history for the given reason.
    ///
    /// Returns `true` if the identifier was throttled or locked beforehand.
    pub fn unlock_account(&self, identifier: &str, reason: UnlockReason) -> bool {
        match self.normalize(identifier) {
            Ok(identifier) => self.unlock_normalized(&identifier, reason),
            Err(_) => false,
        }
    }

    /// Drop failures older than the retention period. Returns the number of identifiers removed.
    pub fn sweep(&self) -> usize {
        self.repository.sweep(self.clock.now_millis())
    }

    /// Lock duration in minutes for `recent_failures` failures in the decision window.
    ///
    /// `0` below the lock threshold, otherwise
    /// `base_minutes * min(recent_failures - multiplier_offset, max_multiplier)`.
    pub fn lockout_minutes(&self, recent_failures: u32) -> u32 {
        if recent_failures < self.config.lock_threshold {
            return 0;
        }

        let multiplier = recent_failures
            .saturating_sub(self.config.multiplier_offset)
            .min(self.config.max_multiplier);
        self.config.base_minutes.saturating_mul(multiplier)
    }

    fn unlock_normalized(&self, identifier: &str, reason: UnlockReason) -> bool {
        let now = self.clock.now_millis();
        let Some(recent) = self
            .repository
            .take(identifier, now, self.config.decision_window)
        else {
            return false;
        };
        tracing::debug!(reason = ?reason, "Cleared failed attempt history");

        let recent = u32::try_from(recent).unwrap_or(u32::MAX);
        let was_restricted = self.state(recent) != LockoutState::Open;

        if was_restricted {
            self.events.emit(Event::AccountUnlocked {
                identifier: identifier.to_string(),
                reason,
                timestamp: timestamp(now),
            });
        }

        was_restricted
    }

    fn state(&self, recent_failures: u32) -> LockoutState {
        if recent_failures >= self.config.lock_threshold {
            LockoutState::Locked
        } else if recent_failures >= self.config.throttle_threshold {
            LockoutState::Throttled
        } else {
            LockoutState::Open
        }
    }

    fn verdict(&self, recent_failures: u32) -> Result<(), LimitError> {
        match self.state(recent_failures) {
            LockoutState::Open => Ok(()),
            LockoutState::Throttled => {
                tracing::warn!(
                    event = "account_throttled",
                    failed_attempts = recent_failures,
                    "Authentication throttled after repeated failures"
                );
                Err(LimitError::AccountThrottled(THROTTLED_MESSAGE.to_string()))
            }
            LockoutState::Locked => {
                let minutes = self.lockout_minutes(recent_failures);
                tracing::warn!(
                    event = "account_locked",
                    failed_attempts = recent_failures,
                    lockout_minutes = minutes,
                    "Authentication denied for locked account"
                );
                Err(LimitError::AccountLocked(format!(
                    "Account locked for {minutes} minutes due to repeated failed attempts"
                )))
            }
        }
    }

    fn count(&self, identifier: &str, window: chrono::Duration) -> u32 {
        let count = self
            .repository
            .count_within(identifier, self.clock.now_millis(), window);
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn normalize(&self, identifier: &str) -> Result<String, LimitError> {
        normalize_identifier(identifier).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected lockout check with malformed identifier");
        })
    }
}
