//! Input validation and normalisation for bucket keys and identifiers
//!
//! Everything that ends up inside a bucket key passes through here so that
//! equivalent inputs share one bucket and malformed inputs are rejected
//! before they touch the store.

use std::net::IpAddr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::LimitError;

/// Identifiers (emails, usernames, user ids): no whitespace, control characters or key separators.
static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s\p{Cc}:]+$").expect("Invalid identifier regex pattern"));

/// Key segments chosen by code (operation names, providers, window labels).
static SEGMENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]{1,64}$").expect("Invalid segment regex pattern"));

/// Maximum accepted identifier length in bytes (RFC 5321 path limit plus headroom)
pub const MAX_IDENTIFIER_LEN: usize = 320;

/// Maximum accepted bucket key length in bytes
pub const MAX_BUCKET_KEY_LEN: usize = 512;

/// Normalises an authentication identifier
///
/// Leading and trailing whitespace is trimmed and the value is lowercased.
///
/// # Examples
///
/// ```rust
/// use turnstile_core::validation::normalize_identifier;
///
/// assert_eq!(normalize_identifier(" Alice@Example.com ").unwrap(), "alice@example.com");
/// assert!(normalize_identifier("   ").is_err());
/// ```
pub fn normalize_identifier(identifier: &str) -> Result<String, LimitError> {
    let trimmed = identifier.trim();

    if trimmed.is_empty() {
        return Err(LimitError::InvalidInput(
            "identifier is empty".to_string(),
        ));
    }

    if trimmed.len() > MAX_IDENTIFIER_LEN {
        return Err(LimitError::InvalidInput(
            "identifier is too long".to_string(),
        ));
    }

    if !IDENTIFIER_REGEX.is_match(trimmed) {
        return Err(LimitError::InvalidInput(
            "identifier contains whitespace, control characters or ':'".to_string(),
        ));
    }

    Ok(trimmed.to_lowercase())
}

/// Parses and canonicalises an IP address
///
/// IPv6 addresses are rendered in their compressed form, so `2001:DB8:0::1`
/// and `2001:db8::1` share a bucket.
pub fn normalize_ip(ip: &str) -> Result<String, LimitError> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| LimitError::InvalidInput("ip address is malformed".to_string()))
}

/// Validates a code-chosen key segment such as an operation or provider name
pub fn validate_segment(segment: &str) -> Result<(), LimitError> {
    if SEGMENT_REGEX.is_match(segment) {
        Ok(())
    } else {
        Err(LimitError::InvalidInput(format!(
            "invalid key segment: {segment}"
        )))
    }
}

/// Validates a raw bucket key passed straight to the rate limiter
pub fn validate_bucket_key(key: &str) -> Result<(), LimitError> {
    if key.is_empty() {
        return Err(LimitError::InvalidInput(
            "bucket key is empty".to_string(),
        ));
    }

    if key.len() > MAX_BUCKET_KEY_LEN {
        return Err(LimitError::InvalidInput(
            "bucket key is too long".to_string(),
        ));
    }

    if key.chars().any(char::is_control) {
        return Err(LimitError::InvalidInput(
            "bucket key contains control characters".to_string(),
        ));
    }

    Ok(())
}
