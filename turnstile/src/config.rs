//! Service configuration
//!
//! [`TurnstileConfig`] gathers everything a deployment may tune: the lockout
//! thresholds, the payment limits and how often expired state is swept.
//! Every field has a compiled-in default, and [`TurnstileConfig::from_env`]
//! overrides them from `TURNSTILE_*` variables.
//!
//! # Example
//!
//! ```rust
//! use turnstile::config::TurnstileConfig;
//!
//! let config = TurnstileConfig::default();
//! assert_eq!(config.payment.max_attempts, 10);
//! assert_eq!(config.lockout.lock_threshold, 20);
//! ```

use chrono::Duration;
use turnstile_core::{
    LockoutConfig,
    error::{ConfigError, utilities::EnvVarExt},
};

pub const ENV_PAYMENT_MAX_ATTEMPTS: &str = "TURNSTILE_PAYMENT_MAX_ATTEMPTS";
pub const ENV_PAYMENT_WINDOW_MS: &str = "TURNSTILE_PAYMENT_WINDOW_MS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "TURNSTILE_SWEEP_INTERVAL_SECS";

/// Limits applied to payment initiation.
///
/// The per-user bucket allows `max_attempts` per `window`; the per-IP bucket
/// allows twice that, since several users may share an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLimits {
    pub max_attempts: u32,
    pub window: Duration,
}

impl Default for PaymentLimits {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: Duration::hours(1),
        }
    }
}

impl PaymentLimits {
    pub fn ip_max_attempts(&self) -> u32 {
        self.max_attempts.saturating_mul(2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnstileConfig {
    pub lockout: LockoutConfig,
    pub payment: PaymentLimits,
    /// How often the background sweeper prunes expired state (default: 5 minutes)
    pub sweep_interval: std::time::Duration,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            lockout: LockoutConfig::default(),
            payment: PaymentLimits::default(),
            sweep_interval: std::time::Duration::from_secs(300),
        }
    }
}

impl TurnstileConfig {
    /// Create configuration from environment variables
    ///
    /// Unset variables keep their defaults. A variable that is set but cannot
    /// be parsed is an error rather than being silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let window_ms: i64 = std::env::var(ENV_PAYMENT_WINDOW_MS)
            .parse_or(ENV_PAYMENT_WINDOW_MS, defaults.payment.window.num_milliseconds())?;
        let window = Duration::try_milliseconds(window_ms).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: ENV_PAYMENT_WINDOW_MS.to_string(),
                value: window_ms.to_string(),
                reason: "window is out of range".to_string(),
            }
        })?;
        let sweep_secs: u64 = std::env::var(ENV_SWEEP_INTERVAL_SECS)
            .parse_or(ENV_SWEEP_INTERVAL_SECS, defaults.sweep_interval.as_secs())?;

        let config = Self {
            lockout: LockoutConfig::from_env()?,
            payment: PaymentLimits {
                max_attempts: std::env::var(ENV_PAYMENT_MAX_ATTEMPTS)
                    .parse_or(ENV_PAYMENT_MAX_ATTEMPTS, defaults.payment.max_attempts)?,
                window,
            },
            sweep_interval: std::time::Duration::from_secs(sweep_secs),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lockout.validate()?;

        if self.payment.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "payment max attempts must be at least 1".to_string(),
            ));
        }

        if self.payment.window <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "payment window must be positive".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_lockout(mut self, lockout: LockoutConfig) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_payment_limits(mut self, max_attempts: u32, window: Duration) -> Self {
        self.payment = PaymentLimits {
            max_attempts,
            window,
        };
        self
    }

    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::config::{ENV_BASE_MINUTES, ENV_LOCK_THRESHOLD, ENV_THROTTLE_THRESHOLD};

    const ALL_VARS: [&str; 6] = [
        ENV_PAYMENT_MAX_ATTEMPTS,
        ENV_PAYMENT_WINDOW_MS,
        ENV_SWEEP_INTERVAL_SECS,
        ENV_THROTTLE_THRESHOLD,
        ENV_LOCK_THRESHOLD,
        ENV_BASE_MINUTES,
    ];

    fn unset_all() -> Vec<(&'static str, Option<&'static str>)> {
        ALL_VARS.iter().map(|key| (*key, None)).collect()
    }

    #[test]
    fn test_defaults() {
        let config = TurnstileConfig::default();
        assert_eq!(config.payment.max_attempts, 10);
        assert_eq!(config.payment.ip_max_attempts(), 20);
        assert_eq!(config.payment.window, Duration::milliseconds(3_600_000));
        assert_eq!(config.sweep_interval.as_secs(), 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_without_variables_uses_defaults() {
        temp_env::with_vars(unset_all(), || {
            let config = TurnstileConfig::from_env().unwrap();
            assert_eq!(config, TurnstileConfig::default());
        });
    }

    #[test]
    fn test_from_env_overrides() {
        temp_env::with_vars(
            [
                (ENV_PAYMENT_MAX_ATTEMPTS, Some("4")),
                (ENV_PAYMENT_WINDOW_MS, Some("600000")),
                (ENV_SWEEP_INTERVAL_SECS, Some(" 60 ")),
                (ENV_THROTTLE_THRESHOLD, Some("5")),
                (ENV_LOCK_THRESHOLD, Some("12")),
                (ENV_BASE_MINUTES, None),
            ],
            || {
                let config = TurnstileConfig::from_env().unwrap();
                assert_eq!(config.payment.max_attempts, 4);
                assert_eq!(config.payment.window, Duration::minutes(10));
                assert_eq!(config.sweep_interval.as_secs(), 60);
                assert_eq!(config.lockout.throttle_threshold, 5);
                assert_eq!(config.lockout.lock_threshold, 12);
                assert_eq!(config.lockout.base_minutes, 30);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_unparsable_value() {
        let mut vars = unset_all();
        vars[0] = (ENV_PAYMENT_MAX_ATTEMPTS, Some("ten"));

        temp_env::with_vars(vars, || {
            let err = TurnstileConfig::from_env().unwrap_err();
            match err {
                ConfigError::InvalidValue { key, value, .. } => {
                    assert_eq!(key, ENV_PAYMENT_MAX_ATTEMPTS);
                    assert_eq!(value, "ten");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        });
    }

    #[test]
    fn test_from_env_rejects_out_of_range_window() {
        let mut vars = unset_all();
        vars[1] = (ENV_PAYMENT_WINDOW_MS, Some("-9223372036854775808"));

        temp_env::with_vars(vars, || {
            let err = TurnstileConfig::from_env().unwrap_err();
            match err {
                ConfigError::InvalidValue { key, value, .. } => {
                    assert_eq!(key, ENV_PAYMENT_WINDOW_MS);
                    assert_eq!(value, "-9223372036854775808");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        });
    }

    #[test]
    fn test_from_env_rejects_inverted_lockout_thresholds() {
        let mut vars = unset_all();
        vars[3] = (ENV_THROTTLE_THRESHOLD, Some("20"));
        vars[4] = (ENV_LOCK_THRESHOLD, Some("20"));

        temp_env::with_vars(vars, || {
            assert!(matches!(
                TurnstileConfig::from_env(),
                Err(ConfigError::Invalid(_))
            ));
        });
    }

    #[test]
    fn test_validate_rejects_degenerate_payment_limits() {
        let zero_attempts = TurnstileConfig::default().with_payment_limits(0, Duration::hours(1));
        assert!(zero_attempts.validate().is_err());

        let zero_window = TurnstileConfig::default().with_payment_limits(5, Duration::zero());
        assert!(zero_window.validate().is_err());

        let no_sweep = TurnstileConfig::default().with_sweep_interval(std::time::Duration::ZERO);
        assert!(no_sweep.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_base_minutes() {
        let config = TurnstileConfig::default().with_lockout(LockoutConfig {
            base_minutes: 0,
            ..Default::default()
        });
        assert!(config.validate().is_err());
    }
}
