use std::{env::VarError, fmt::Display, str::FromStr};

use crate::error::ConfigError;

/// Extension trait for environment lookups to simplify configuration parsing
///
/// Unset variables fall back to the given default. Set but unparsable values
/// are reported as [`ConfigError::InvalidValue`] instead of being silently ignored.
///
/// # Example
///
/// ```rust
/// use turnstile_core::error::utilities::EnvVarExt;
///
/// let attempts: u32 = std::env::var("TURNSTILE_DOC_EXAMPLE_UNSET")
///     .parse_or("TURNSTILE_DOC_EXAMPLE_UNSET", 10)
///     .unwrap();
/// assert_eq!(attempts, 10);
/// ```
pub trait EnvVarExt {
    /// Parse the variable's value, or return `default` when it is not set
    fn parse_or<T>(self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display;
}

impl EnvVarExt for Result<String, VarError> {
    fn parse_or<T>(self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self {
            Ok(value) => value
                .trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    value,
                    reason: e.to_string(),
                }),
            Err(VarError::NotPresent) => Ok(default),
            Err(VarError::NotUnicode(raw)) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string_lossy().into_owned(),
                reason: "value is not valid unicode".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        let value: u32 = Err(VarError::NotPresent).parse_or("KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_parse_or_parses_trimmed_value() {
        let value: i64 = Ok(" 3600000 ".to_string()).parse_or("KEY", 0).unwrap();
        assert_eq!(value, 3_600_000);
    }

    #[test]
    fn test_parse_or_reports_invalid_value() {
        let err = Ok::<_, VarError>("ten".to_string())
            .parse_or::<u32>("TURNSTILE_PAYMENT_MAX_ATTEMPTS", 10)
            .unwrap_err();

        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "TURNSTILE_PAYMENT_MAX_ATTEMPTS");
                assert_eq!(value, "ten");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
