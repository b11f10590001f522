//! Throttling policies
//!
//! A policy is a set of cascades, one per `(operation, dimension)` pair. A
//! cascade is a list of [`Tier`]s in ascending window order and every tier
//! must hold for a request to pass. The compiled-in table is built by
//! [`PolicyTable::defaults`]; individual cascades can be replaced through
//! [`PolicyTable::set`] or the service builder.
//!
//! Buckets are keyed `"{operation}:{dimension}:{value}:{label}"`. OAuth
//! operations put the provider in front of the value, so a callback from
//! `203.0.113.5` through Google lands in `"oauth_callback:ip:google:203.0.113.5:1m"`.

mod checks;

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
};

use chrono::Duration;
use turnstile_core::{ConfigError, validation::validate_segment};

use crate::config::PaymentLimits;

/// A protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authentication,
    Signup,
    PasswordResetRequest,
    PasswordResetForm,
    EmailVerificationResend,
    OAuthInitiation,
    OAuthCallback,
    OAuthCompletion,
    UsernameChange,
    PaymentInitiation,
    CalendarDiscovery,
    VideoConnectionTest,
    CaldavConnectionTest,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Authentication,
        Operation::Signup,
        Operation::PasswordResetRequest,
        Operation::PasswordResetForm,
        Operation::EmailVerificationResend,
        Operation::OAuthInitiation,
        Operation::OAuthCallback,
        Operation::OAuthCompletion,
        Operation::UsernameChange,
        Operation::PaymentInitiation,
        Operation::CalendarDiscovery,
        Operation::VideoConnectionTest,
        Operation::CaldavConnectionTest,
    ];

    /// Name used as the first segment of bucket keys and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Authentication => "auth",
            Operation::Signup => "signup",
            Operation::PasswordResetRequest => "password_reset_request",
            Operation::PasswordResetForm => "password_reset_form",
            Operation::EmailVerificationResend => "email_verification_resend",
            Operation::OAuthInitiation => "oauth_initiation",
            Operation::OAuthCallback => "oauth_callback",
            Operation::OAuthCompletion => "oauth_completion",
            Operation::UsernameChange => "username_change",
            Operation::PaymentInitiation => "payment_initiation",
            Operation::CalendarDiscovery => "calendar_discovery",
            Operation::VideoConnectionTest => "video_connection_test",
            Operation::CaldavConnectionTest => "caldav_connection_test",
        }
    }

    /// Dimensions checked for this operation, in evaluation order.
    pub fn dimensions(&self) -> &'static [Dimension] {
        match self {
            Operation::Authentication | Operation::OAuthCompletion => {
                &[Dimension::Identifier, Dimension::Ip]
            }
            Operation::Signup => &[Dimension::Ip, Dimension::Email],
            Operation::PasswordResetRequest | Operation::EmailVerificationResend => {
                &[Dimension::Email, Dimension::Ip]
            }
            Operation::PasswordResetForm
            | Operation::OAuthInitiation
            | Operation::OAuthCallback => &[Dimension::Ip],
            Operation::UsernameChange
            | Operation::CalendarDiscovery
            | Operation::VideoConnectionTest => &[Dimension::User],
            Operation::PaymentInitiation | Operation::CaldavConnectionTest => {
                &[Dimension::User, Dimension::Ip]
            }
        }
    }

    /// Whether bucket keys carry an OAuth provider segment.
    pub fn is_provider_scoped(&self) -> bool {
        matches!(self, Operation::OAuthInitiation | Operation::OAuthCallback)
    }

    /// User-facing message returned when this operation is rate limited.
    pub fn denial_message(&self) -> &'static str {
        match self {
            Operation::Authentication => "Too many login attempts. Please try again later.",
            Operation::Signup => "Too many signup attempts. Please try again later.",
            Operation::PasswordResetRequest => {
                "Too many password reset requests. Please try again later."
            }
            Operation::PasswordResetForm => {
                "Too many password reset attempts. Please try again later."
            }
            Operation::EmailVerificationResend => {
                "Too many verification emails requested. Please try again later."
            }
            Operation::OAuthInitiation | Operation::OAuthCallback | Operation::OAuthCompletion => {
                "Too many sign-in attempts. Please try again later."
            }
            Operation::UsernameChange => "Too many username changes. Please try again later.",
            Operation::PaymentInitiation => "Too many payment attempts. Please try again later.",
            Operation::CalendarDiscovery => {
                "Too many calendar discovery requests. Please try again later."
            }
            Operation::VideoConnectionTest | Operation::CaldavConnectionTest => {
                "Too many connection tests. Please try again later."
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The axis a bucket is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Identifier,
    Email,
    Ip,
    User,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Identifier => "identifier",
            Dimension::Email => "email",
            Dimension::Ip => "ip",
            Dimension::User => "user",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(label, limit, window)` entry of a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tier {
    label: Cow<'static, str>,
    limit: u32,
    window: Duration,
}

impl Tier {
    pub fn new(label: impl Into<Cow<'static, str>>, limit: u32, window: Duration) -> Self {
        Self {
            label: label.into(),
            limit,
            window,
        }
    }

    /// A tier labelled after its window, e.g. `30m` or `1h`.
    pub fn for_window(limit: u32, window: Duration) -> Self {
        Self::new(window_label(window), limit, window)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Label for a window: the largest unit that divides it exactly.
///
/// ```rust
/// use chrono::Duration;
/// use turnstile::policy::window_label;
///
/// assert_eq!(window_label(Duration::minutes(30)), "30m");
/// assert_eq!(window_label(Duration::hours(24)), "1d");
/// assert_eq!(window_label(Duration::milliseconds(1_500)), "1500ms");
/// ```
pub fn window_label(window: Duration) -> String {
    const UNITS: [(i64, &str); 5] = [
        (7 * 24 * 60 * 60 * 1000, "w"),
        (24 * 60 * 60 * 1000, "d"),
        (60 * 60 * 1000, "h"),
        (60 * 1000, "m"),
        (1000, "s"),
    ];

    let ms = window.num_milliseconds();
    if ms > 0 {
        for (unit_ms, suffix) in UNITS {
            if ms % unit_ms == 0 {
                return format!("{}{suffix}", ms / unit_ms);
            }
        }
    }
    format!("{ms}ms")
}

/// Build a bucket key.
///
/// `scope` is the OAuth provider for provider-scoped operations.
pub fn bucket_key(
    operation: Operation,
    dimension: Dimension,
    scope: Option<&str>,
    value: &str,
    tier: &Tier,
) -> String {
    match scope {
        Some(scope) => format!(
            "{}:{}:{scope}:{value}:{}",
            operation.as_str(),
            dimension.as_str(),
            tier.label()
        ),
        None => format!(
            "{}:{}:{value}:{}",
            operation.as_str(),
            dimension.as_str(),
            tier.label()
        ),
    }
}

/// The cascades for every protected operation.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    cascades: HashMap<(Operation, Dimension), Vec<Tier>>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults(&PaymentLimits::default())
    }
}

impl PolicyTable {
    /// The compiled-in cascades, with payment limits taken from configuration.
    pub fn defaults(payment: &PaymentLimits) -> Self {
        use Dimension::*;
        use Operation::*;

        let minute = Duration::minutes(1);
        let ten_minutes = Duration::minutes(10);
        let hour = Duration::hours(1);
        let day = Duration::days(1);
        let week = Duration::weeks(1);

        let mut cascades = HashMap::new();
        let mut add = |operation: Operation, dimension: Dimension, tiers: Vec<Tier>| {
            cascades.insert((operation, dimension), tiers);
        };

        add(
            Authentication,
            Identifier,
            vec![Tier::new("30m", 10, Duration::minutes(30))],
        );
        add(
            Authentication,
            Ip,
            vec![
                Tier::new("10m", 30, ten_minutes),
                Tier::new("1h", 100, hour),
                Tier::new("1d", 500, day),
            ],
        );

        add(
            Signup,
            Ip,
            vec![
                Tier::new("10m", 5, ten_minutes),
                Tier::new("1h", 8, hour),
                Tier::new("1d", 10, day),
                Tier::new("1w", 12, week),
                Tier::new("1mo", 15, Duration::days(30)),
                Tier::new("1y", 20, Duration::days(365)),
            ],
        );
        add(
            Signup,
            Email,
            vec![Tier::new("1h", 3, hour), Tier::new("1d", 5, day)],
        );

        add(
            PasswordResetRequest,
            Email,
            vec![Tier::new("1h", 3, hour), Tier::new("1d", 6, day)],
        );
        add(
            PasswordResetRequest,
            Ip,
            vec![Tier::new("1h", 10, hour), Tier::new("1d", 30, day)],
        );
        add(
            PasswordResetForm,
            Ip,
            vec![
                Tier::new("15m", 10, Duration::minutes(15)),
                Tier::new("1h", 30, hour),
            ],
        );

        add(
            EmailVerificationResend,
            Email,
            vec![
                Tier::new("10m", 3, ten_minutes),
                Tier::new("1h", 5, hour),
                Tier::new("1d", 10, day),
            ],
        );
        add(EmailVerificationResend, Ip, vec![Tier::new("1h", 20, hour)]);

        for operation in [OAuthInitiation, OAuthCallback] {
            add(
                operation,
                Ip,
                vec![Tier::new("1m", 10, minute), Tier::new("1h", 60, hour)],
            );
        }
        add(OAuthCompletion, Identifier, vec![Tier::new("1h", 10, hour)]);
        add(OAuthCompletion, Ip, vec![Tier::new("1h", 30, hour)]);

        add(
            UsernameChange,
            User,
            vec![
                Tier::new("1h", 3, hour),
                Tier::new("1d", 5, day),
                Tier::new("1w", 10, week),
            ],
        );

        add(
            PaymentInitiation,
            User,
            vec![Tier::for_window(payment.max_attempts, payment.window)],
        );
        add(
            PaymentInitiation,
            Ip,
            vec![Tier::for_window(payment.ip_max_attempts(), payment.window)],
        );

        for operation in [CalendarDiscovery, VideoConnectionTest] {
            add(
                operation,
                User,
                vec![Tier::new("1m", 5, minute), Tier::new("1h", 30, hour)],
            );
        }
        add(
            CaldavConnectionTest,
            User,
            vec![Tier::new("1m", 5, minute), Tier::new("1h", 20, hour)],
        );
        add(CaldavConnectionTest, Ip, vec![Tier::new("1h", 50, hour)]);

        Self { cascades }
    }

    /// Tiers for one dimension of an operation, in evaluation order.
    pub fn tiers(&self, operation: Operation, dimension: Dimension) -> &[Tier] {
        self.cascades
            .get(&(operation, dimension))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace the cascade for one dimension of an operation.
    ///
    /// The tiers must be non-empty, have positive windows in strictly
    /// ascending order and carry distinct labels usable as key segments.
    pub fn set(
        &mut self,
        operation: Operation,
        dimension: Dimension,
        tiers: Vec<Tier>,
    ) -> Result<(), ConfigError> {
        if !operation.dimensions().contains(&dimension) {
            return Err(ConfigError::Invalid(format!(
                "{operation} is not limited by {dimension}"
            )));
        }

        validate_tiers(operation, dimension, &tiers)?;
        self.cascades.insert((operation, dimension), tiers);
        Ok(())
    }
}

fn validate_tiers(
    operation: Operation,
    dimension: Dimension,
    tiers: &[Tier],
) -> Result<(), ConfigError> {
    if tiers.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{operation}:{dimension} needs at least one tier"
        )));
    }

    let mut labels = HashSet::with_capacity(tiers.len());
    for (i, tier) in tiers.iter().enumerate() {
        validate_segment(tier.label()).map_err(|_| {
            ConfigError::Invalid(format!(
                "{operation}:{dimension} has invalid tier label {:?}",
                tier.label()
            ))
        })?;

        if !labels.insert(tier.label()) {
            return Err(ConfigError::Invalid(format!(
                "{operation}:{dimension} has duplicate tier label {}",
                tier.label()
            )));
        }

        if tier.window() <= Duration::zero() {
            return Err(ConfigError::Invalid(format!(
                "{operation}:{dimension} tier {} has a non-positive window",
                tier.label()
            )));
        }

        if i > 0 && tier.window() <= tiers[i - 1].window() {
            return Err(ConfigError::Invalid(format!(
                "{operation}:{dimension} tiers must be in ascending window order"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_operation_dimension_has_a_cascade() {
        let table = PolicyTable::default();
        for operation in Operation::ALL {
            for dimension in operation.dimensions() {
                let tiers = table.tiers(operation, *dimension);
                assert!(!tiers.is_empty(), "{operation}:{dimension} has no tiers");
                assert!(validate_tiers(operation, *dimension, tiers).is_ok());
            }
        }
    }

    #[test]
    fn test_signup_ip_cascade() {
        let table = PolicyTable::default();
        let tiers: Vec<_> = table
            .tiers(Operation::Signup, Dimension::Ip)
            .iter()
            .map(|t| (t.label().to_string(), t.limit()))
            .collect();

        let expected: Vec<(String, u32)> =
            [("10m", 5), ("1h", 8), ("1d", 10), ("1w", 12), ("1mo", 15), ("1y", 20)]
                .into_iter()
                .map(|(label, limit)| (label.to_string(), limit))
                .collect();
        assert_eq!(tiers, expected);
    }

    #[test]
    fn test_payment_tiers_follow_configuration() {
        let table = PolicyTable::defaults(&PaymentLimits {
            max_attempts: 4,
            window: Duration::minutes(15),
        });

        let user = &table.tiers(Operation::PaymentInitiation, Dimension::User)[0];
        assert_eq!((user.label(), user.limit()), ("15m", 4));

        let ip = &table.tiers(Operation::PaymentInitiation, Dimension::Ip)[0];
        assert_eq!((ip.label(), ip.limit()), ("15m", 8));
    }

    #[test]
    fn test_window_label() {
        assert_eq!(window_label(Duration::minutes(1)), "1m");
        assert_eq!(window_label(Duration::minutes(90)), "90m");
        assert_eq!(window_label(Duration::hours(1)), "1h");
        assert_eq!(window_label(Duration::weeks(2)), "2w");
        assert_eq!(window_label(Duration::seconds(45)), "45s");
        assert_eq!(window_label(Duration::zero()), "0ms");
    }

    #[test]
    fn test_bucket_keys() {
        let tier = Tier::new("1m", 10, Duration::minutes(1));
        assert_eq!(
            bucket_key(
                Operation::OAuthCallback,
                Dimension::Ip,
                Some("google"),
                "203.0.113.5",
                &tier
            ),
            "oauth_callback:ip:google:203.0.113.5:1m"
        );

        let tier = Tier::new("30m", 10, Duration::minutes(30));
        assert_eq!(
            bucket_key(
                Operation::Authentication,
                Dimension::Identifier,
                None,
                "alice@example.com",
                &tier
            ),
            "auth:identifier:alice@example.com:30m"
        );
    }

    #[test]
    fn test_set_rejects_malformed_cascades() {
        let mut table = PolicyTable::default();

        let descending = vec![
            Tier::new("1h", 8, Duration::hours(1)),
            Tier::new("10m", 5, Duration::minutes(10)),
        ];
        assert!(table.set(Operation::Signup, Dimension::Ip, descending).is_err());

        assert!(table.set(Operation::Signup, Dimension::Ip, vec![]).is_err());

        let bad_label = vec![Tier::new("1 hour", 8, Duration::hours(1))];
        assert!(table.set(Operation::Signup, Dimension::Ip, bad_label).is_err());

        let zero_window = vec![Tier::new("0s", 8, Duration::zero())];
        assert!(table.set(Operation::Signup, Dimension::Ip, zero_window).is_err());

        // Signup is not limited per user
        let tiers = vec![Tier::new("1h", 8, Duration::hours(1))];
        assert!(table.set(Operation::Signup, Dimension::User, tiers).is_err());
    }

    #[test]
    fn test_set_replaces_cascade() {
        let mut table = PolicyTable::default();
        let tiers = vec![
            Tier::new("10m", 2, Duration::minutes(10)),
            Tier::for_window(4, Duration::hours(2)),
        ];

        table
            .set(Operation::PasswordResetForm, Dimension::Ip, tiers.clone())
            .unwrap();
        assert_eq!(table.tiers(Operation::PasswordResetForm, Dimension::Ip), tiers.as_slice());
        assert_eq!(tiers[1].label(), "2h");
    }
}
