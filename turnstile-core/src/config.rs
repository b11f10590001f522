//! Lockout configuration.
//!
//! The thresholds and the escalation formula are compiled-in defaults that a
//! deployment may override, either in code or through [`LockoutConfig::from_env`].

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, utilities::EnvVarExt};

pub const ENV_THROTTLE_THRESHOLD: &str = "TURNSTILE_LOCKOUT_THROTTLE_THRESHOLD";
pub const ENV_LOCK_THRESHOLD: &str = "TURNSTILE_LOCKOUT_LOCK_THRESHOLD";
pub const ENV_BASE_MINUTES: &str = "TURNSTILE_LOCKOUT_BASE_MINUTES";

/// Configuration for progressive account lockout.
///
/// With `n` failures inside `decision_window`:
///
/// - `n < throttle_threshold`: open
/// - `throttle_threshold <= n < lock_threshold`: throttled
/// - `n >= lock_threshold`: locked for
///   `base_minutes * min(n - multiplier_offset, max_multiplier)` minutes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Failures in the decision window before throttling begins (default: 10)
    pub throttle_threshold: u32,
    /// Failures in the decision window before the account is locked (default: 20)
    pub lock_threshold: u32,
    /// Minutes per escalation step (default: 30)
    pub base_minutes: u32,
    /// Subtracted from the failure count to get the multiplier (default: 8)
    pub multiplier_offset: u32,
    /// Upper bound on the multiplier (default: 8)
    pub max_multiplier: u32,
    /// Window that throttle and lock decisions are made over (default: 1 hour)
    #[serde(with = "duration_millis")]
    pub decision_window: Duration,
    /// How long failures are retained for reporting (default: 24 hours)
    #[serde(with = "duration_millis")]
    pub retention: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            throttle_threshold: 10,
            lock_threshold: 20,
            base_minutes: 30,
            multiplier_offset: 8,
            max_multiplier: 8,
            decision_window: Duration::hours(1),
            retention: Duration::hours(24),
        }
    }
}

impl LockoutConfig {
    /// Build a configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            throttle_threshold: std::env::var(ENV_THROTTLE_THRESHOLD)
                .parse_or(ENV_THROTTLE_THRESHOLD, defaults.throttle_threshold)?,
            lock_threshold: std::env::var(ENV_LOCK_THRESHOLD)
                .parse_or(ENV_LOCK_THRESHOLD, defaults.lock_threshold)?,
            base_minutes: std::env::var(ENV_BASE_MINUTES)
                .parse_or(ENV_BASE_MINUTES, defaults.base_minutes)?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle_threshold == 0 {
            return Err(ConfigError::Invalid(
                "lockout throttle threshold must be at least 1".to_string(),
            ));
        }

        if self.lock_threshold <= self.throttle_threshold {
            return Err(ConfigError::Invalid(format!(
                "lockout lock threshold ({}) must be greater than the throttle threshold ({})",
                self.lock_threshold, self.throttle_threshold
            )));
        }

        if self.base_minutes == 0 || self.max_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "lockout base minutes and max multiplier must be positive".to_string(),
            ));
        }

        if self.decision_window <= Duration::zero() || self.retention < self.decision_window {
            return Err(ConfigError::Invalid(
                "lockout retention must cover a positive decision window".to_string(),
            ));
        }

        Ok(())
    }

    /// Failures kept per identifier. Past this point more failures cannot
    /// change the state, so older ones are dropped.
    pub fn max_recorded_failures(&self) -> u32 {
        self.lock_threshold.saturating_add(self.max_multiplier)
    }

    /// Longest lock duration the formula can produce, in minutes.
    pub fn max_lockout_minutes(&self) -> u32 {
        self.base_minutes.saturating_mul(self.max_multiplier)
    }
}

/// Serialises a [`chrono::Duration`] as whole milliseconds.
pub mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Duration::try_milliseconds(millis)
            .ok_or_else(|| de::Error::custom(format!("duration of {millis}ms is out of range")))
    }
}
