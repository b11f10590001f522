pub mod utilities;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Limit error: {0}")]
    Limit(#[from] LimitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// A denial returned by a rate limit, lockout or policy check.
///
/// The `String` payload is a short, user-facing message. It never contains
/// internal counters or the remaining wait time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    AccountLocked(String),

    #[error("{0}")]
    AccountThrottled(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Message used when a generic rate limit denies a request.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";

impl LimitError {
    /// Shorthand for a rate-limited denial carrying the generic message.
    pub fn rate_limited() -> Self {
        LimitError::RateLimited(RATE_LIMITED_MESSAGE.to_string())
    }

    /// The user-facing message carried by this denial.
    pub fn message(&self) -> &str {
        match self {
            LimitError::RateLimited(message)
            | LimitError::AccountLocked(message)
            | LimitError::AccountThrottled(message)
            | LimitError::InvalidInput(message) => message,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LimitError::RateLimited(_))
    }

    pub fn is_lockout(&self) -> bool {
        matches!(
            self,
            LimitError::AccountLocked(_) | LimitError::AccountThrottled(_)
        )
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, LimitError::InvalidInput(_))
    }

    /// Collapse lockout verdicts into `RateLimited`, keeping the message.
    ///
    /// Invalid input becomes the generic rate-limited message so that the
    /// caller-facing layer never echoes what was rejected.
    pub fn into_rate_limited(self) -> Self {
        match self {
            LimitError::RateLimited(_) => self,
            LimitError::AccountLocked(message) | LimitError::AccountThrottled(message) => {
                LimitError::RateLimited(message)
            }
            LimitError::InvalidInput(_) => LimitError::rate_limited(),
        }
    }
}

impl Error {
    pub fn is_limit_error(&self) -> bool {
        matches!(self, Error::Limit(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
