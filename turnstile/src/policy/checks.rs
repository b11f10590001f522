//! One check per protected operation.
//!
//! Every check normalises all of its inputs before touching any bucket, so a
//! malformed IP never leaves a half-recorded email bucket behind. Lockout is
//! consulted before rate limits where it applies, then each dimension's
//! cascade is evaluated in order and the first violated tier ends the check.

use turnstile_core::{
    AttemptLogRepository, LimitError, RateDecision, UnlockReason,
    events::{Event, timestamp},
    validation::{normalize_identifier, normalize_ip, validate_segment},
};

use super::{Dimension, Operation, Tier, bucket_key};
use crate::Turnstile;

impl<R: AttemptLogRepository> Turnstile<R> {
    /// Gate a login attempt.
    ///
    /// A throttled or locked identifier is denied with
    /// [`LimitError::AccountThrottled`] or [`LimitError::AccountLocked`]
    /// before any rate limit is consulted. The outcome of the attempt itself
    /// is reported afterwards through [`record_authentication`](Self::record_authentication).
    pub fn check_authentication(
        &self,
        identifier: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::Authentication;
        let identifier = self.normalize(operation, Dimension::Identifier, identifier)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        self.lockout.check_lockout_status(&identifier)?;

        self.enforce(operation, None, &subjects(identifier, ip))
    }

    /// Record whether an authentication attempt succeeded.
    ///
    /// A success clears the identifier's failure history. A failure is
    /// recorded and the resulting lockout verdict is returned.
    pub fn record_authentication(&self, identifier: &str, success: bool) -> Result<(), LimitError> {
        self.lockout
            .check_and_record_attempt(identifier, success)
            .map_err(|e| match e {
                LimitError::InvalidInput(_) => LimitError::RateLimited(
                    Operation::Authentication.denial_message().to_string(),
                ),
                other => other,
            })
    }

    pub fn check_signup(&self, email: &str, ip: Option<&str>) -> Result<(), LimitError> {
        let operation = Operation::Signup;
        let email = self.normalize(operation, Dimension::Email, email)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        let mut subjects = Vec::with_capacity(2);
        if let Some(ip) = ip {
            subjects.push((Dimension::Ip, ip));
        }
        subjects.push((Dimension::Email, email));

        self.enforce(operation, None, &subjects)
    }

    pub fn check_password_reset_request(
        &self,
        email: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::PasswordResetRequest;
        let email = self.normalize(operation, Dimension::Email, email)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        let mut subjects = vec![(Dimension::Email, email)];
        subjects.extend(ip.map(|ip| (Dimension::Ip, ip)));
        self.enforce(operation, None, &subjects)
    }

    /// Gate submission of the new-password form reached from a reset link.
    pub fn check_password_reset_form(&self, ip: &str) -> Result<(), LimitError> {
        let operation = Operation::PasswordResetForm;
        let ip = self.normalize(operation, Dimension::Ip, ip)?;
        self.enforce(operation, None, &[(Dimension::Ip, ip)])
    }

    pub fn check_email_verification_resend(
        &self,
        email: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::EmailVerificationResend;
        let email = self.normalize(operation, Dimension::Email, email)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        let mut subjects = vec![(Dimension::Email, email)];
        subjects.extend(ip.map(|ip| (Dimension::Ip, ip)));
        self.enforce(operation, None, &subjects)
    }

    /// Gate the redirect to an OAuth provider. Buckets are per provider.
    pub fn check_oauth_initiation(&self, provider: &str, ip: &str) -> Result<(), LimitError> {
        self.check_provider_scoped(Operation::OAuthInitiation, provider, ip)
    }

    /// Gate the return from an OAuth provider. Buckets are per provider.
    pub fn check_oauth_callback(&self, provider: &str, ip: &str) -> Result<(), LimitError> {
        self.check_provider_scoped(Operation::OAuthCallback, provider, ip)
    }

    /// Gate account linking after a successful OAuth exchange.
    ///
    /// The identifier's lockout is honoured, but reported as
    /// [`LimitError::RateLimited`] so the OAuth flow does not reveal lockout state.
    pub fn check_oauth_completion(
        &self,
        identifier: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::OAuthCompletion;
        let identifier = self.normalize(operation, Dimension::Identifier, identifier)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        self.lockout
            .check_lockout_status(&identifier)
            .map_err(LimitError::into_rate_limited)?;

        self.enforce(operation, None, &subjects(identifier, ip))
    }

    pub fn check_username_change(&self, user_id: &str) -> Result<(), LimitError> {
        self.check_user_scoped(Operation::UsernameChange, user_id)
    }

    /// Gate checkout creation with the configured payment limits.
    pub fn check_payment_initiation(
        &self,
        user_id: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::PaymentInitiation;
        let user_id = self.normalize(operation, Dimension::User, user_id)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        let mut subjects = vec![(Dimension::User, user_id)];
        subjects.extend(ip.map(|ip| (Dimension::Ip, ip)));
        self.enforce(operation, None, &subjects)
    }

    pub fn check_calendar_discovery(&self, user_id: &str) -> Result<(), LimitError> {
        self.check_user_scoped(Operation::CalendarDiscovery, user_id)
    }

    pub fn check_video_connection_test(&self, user_id: &str) -> Result<(), LimitError> {
        self.check_user_scoped(Operation::VideoConnectionTest, user_id)
    }

    pub fn check_caldav_connection_test(
        &self,
        user_id: &str,
        ip: Option<&str>,
    ) -> Result<(), LimitError> {
        let operation = Operation::CaldavConnectionTest;
        let user_id = self.normalize(operation, Dimension::User, user_id)?;
        let ip = self.normalize_optional(operation, Dimension::Ip, ip)?;

        let mut subjects = vec![(Dimension::User, user_id)];
        subjects.extend(ip.map(|ip| (Dimension::Ip, ip)));
        self.enforce(operation, None, &subjects)
    }

    /// Delete every tier's bucket for one dimension value of an operation.
    ///
    /// Provider-scoped OAuth buckets are cleared with
    /// [`clear_provider_operation`](Self::clear_provider_operation).
    pub fn clear_operation(
        &self,
        operation: Operation,
        dimension: Dimension,
        value: &str,
    ) -> Result<(), LimitError> {
        if operation.is_provider_scoped() {
            return Err(LimitError::InvalidInput(format!(
                "{operation} buckets are scoped by provider"
            )));
        }
        self.clear_buckets(operation, dimension, None, value)
    }

    /// Delete the per-provider IP buckets of an OAuth operation.
    pub fn clear_provider_operation(
        &self,
        operation: Operation,
        provider: &str,
        ip: &str,
    ) -> Result<(), LimitError> {
        if !operation.is_provider_scoped() {
            return Err(LimitError::InvalidInput(format!(
                "{operation} buckets are not scoped by provider"
            )));
        }
        let provider = normalize_provider(provider)?;
        self.clear_buckets(operation, Dimension::Ip, Some(&provider), ip)
    }

    /// Clear the lockout and login buckets of an account after its owner
    /// completed a password reset.
    ///
    /// Returns `true` if the account was throttled or locked beforehand.
    pub fn reset_after_password_reset(&self, email: &str) -> bool {
        let was_restricted = self.lockout.unlock_account(email, UnlockReason::PasswordReset);

        if let Err(e) =
            self.clear_buckets(Operation::Authentication, Dimension::Identifier, None, email)
        {
            tracing::warn!(error = %e, "Skipped login bucket reset for malformed identifier");
        }

        was_restricted
    }

    fn check_user_scoped(&self, operation: Operation, user_id: &str) -> Result<(), LimitError> {
        let user_id = self.normalize(operation, Dimension::User, user_id)?;
        self.enforce(operation, None, &[(Dimension::User, user_id)])
    }

    fn check_provider_scoped(
        &self,
        operation: Operation,
        provider: &str,
        ip: &str,
    ) -> Result<(), LimitError> {
        let provider = normalize_provider(provider).map_err(|e| {
            tracing::warn!(
                operation = operation.as_str(),
                error = %e,
                "Rejected check with malformed provider"
            );
            LimitError::RateLimited(operation.denial_message().to_string())
        })?;
        let ip = self.normalize(operation, Dimension::Ip, ip)?;

        self.enforce(operation, Some(&provider), &[(Dimension::Ip, ip)])
    }

    fn clear_buckets(
        &self,
        operation: Operation,
        dimension: Dimension,
        scope: Option<&str>,
        value: &str,
    ) -> Result<(), LimitError> {
        if !operation.dimensions().contains(&dimension) {
            return Err(LimitError::InvalidInput(format!(
                "{operation} is not limited by {dimension}"
            )));
        }

        let value = normalize_value(dimension, value)?;
        for tier in self.policies.tiers(operation, dimension) {
            self.rate_limiter
                .clear_bucket(&bucket_key(operation, dimension, scope, &value, tier));
        }

        tracing::debug!(
            operation = operation.as_str(),
            dimension = dimension.as_str(),
            "Cleared rate limit buckets"
        );
        Ok(())
    }

    /// Evaluate every tier of every subject in order, stopping at the first deny.
    fn enforce(
        &self,
        operation: Operation,
        scope: Option<&str>,
        subjects: &[(Dimension, String)],
    ) -> Result<(), LimitError> {
        for (dimension, value) in subjects {
            for tier in self.policies.tiers(operation, *dimension) {
                let key = bucket_key(operation, *dimension, scope, value, tier);
                match self.rate_limiter.check_rate(&key, tier.window(), tier.limit()) {
                    RateDecision::Allow { count } => {
                        tracing::trace!(
                            operation = operation.as_str(),
                            dimension = dimension.as_str(),
                            window = tier.label(),
                            count = count,
                            "Rate limit tier passed"
                        );
                    }
                    RateDecision::Deny { .. } => {
                        return Err(self.deny(operation, *dimension, tier));
                    }
                }
            }
        }

        Ok(())
    }

    fn deny(&self, operation: Operation, dimension: Dimension, tier: &Tier) -> LimitError {
        tracing::warn!(
            event = "rate_limited",
            operation = operation.as_str(),
            dimension = dimension.as_str(),
            window = tier.label(),
            limit = tier.limit(),
            "Rate limit exceeded"
        );

        self.events.emit(Event::RateLimited {
            operation: operation.as_str().to_string(),
            dimension: dimension.as_str().to_string(),
            window: tier.label().to_string(),
            limit: tier.limit(),
            timestamp: timestamp(self.clock.now_millis()),
        });

        LimitError::RateLimited(operation.denial_message().to_string())
    }

    /// Normalise one input, failing closed with the operation's message.
    fn normalize(
        &self,
        operation: Operation,
        dimension: Dimension,
        raw: &str,
    ) -> Result<String, LimitError> {
        normalize_value(dimension, raw).map_err(|e| {
            tracing::warn!(
                operation = operation.as_str(),
                dimension = dimension.as_str(),
                error = %e,
                "Rejected check with malformed input"
            );
            LimitError::RateLimited(operation.denial_message().to_string())
        })
    }

    fn normalize_optional(
        &self,
        operation: Operation,
        dimension: Dimension,
        raw: Option<&str>,
    ) -> Result<Option<String>, LimitError> {
        raw.map(|raw| self.normalize(operation, dimension, raw))
            .transpose()
    }
}

fn normalize_value(dimension: Dimension, raw: &str) -> Result<String, LimitError> {
    match dimension {
        Dimension::Ip => normalize_ip(raw),
        Dimension::Identifier | Dimension::Email | Dimension::User => normalize_identifier(raw),
    }
}

fn normalize_provider(provider: &str) -> Result<String, LimitError> {
    let provider = provider.trim().to_ascii_lowercase();
    validate_segment(&provider)?;
    Ok(provider)
}

fn subjects(identifier: String, ip: Option<String>) -> Vec<(Dimension, String)> {
    let mut subjects = vec![(Dimension::Identifier, identifier)];
    subjects.extend(ip.map(|ip| (Dimension::Ip, ip)));
    subjects
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use turnstile_core::MockClock;

    use crate::{
        Turnstile,
        config::TurnstileConfig,
        policy::{Dimension, Operation},
    };

    fn turnstile() -> (Turnstile, MockClock) {
        let clock = MockClock::default();
        let turnstile = Turnstile::builder()
            .with_clock(clock.clone())
            .build()
            .unwrap();
        (turnstile, clock)
    }

    #[test]
    fn test_authentication_identifier_cascade() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..10 {
            turnstile
                .check_authentication("alice@example.com", Some("203.0.113.5"))
                .unwrap();
        }

        let err = turnstile
            .check_authentication("Alice@Example.com", Some("203.0.113.6"))
            .unwrap_err();
        assert_eq!(err.message(), "Too many login attempts. Please try again later.");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_authentication_ip_is_shared_across_identifiers() {
        let (turnstile, _clock) = turnstile();

        for i in 0..30 {
            turnstile
                .check_authentication(&format!("user{i}@example.com"), Some("203.0.113.5"))
                .unwrap();
        }

        assert!(
            turnstile
                .check_authentication("user99@example.com", Some("203.0.113.5"))
                .is_err()
        );
        assert!(
            turnstile
                .check_authentication("user99@example.com", Some("198.51.100.1"))
                .is_ok()
        );
    }

    #[test]
    fn test_signup_checks_ip_before_email() {
        let (turnstile, _clock) = turnstile();

        for i in 0..5 {
            turnstile
                .check_signup(&format!("new{i}@example.com"), Some("203.0.113.5"))
                .unwrap();
        }

        // The IP tier denies, so the email bucket is never touched
        assert!(turnstile.check_signup("fresh@example.com", Some("203.0.113.5")).is_err());
        assert_eq!(
            turnstile
                .rate_limiter()
                .bucket_count("signup:email:fresh@example.com:1h", Duration::hours(1)),
            0
        );
    }

    #[test]
    fn test_signup_without_ip_only_checks_email() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..3 {
            turnstile.check_signup("a@x.com", None).unwrap();
        }
        assert!(turnstile.check_signup("a@x.com", None).is_err());
    }

    #[test]
    fn test_malformed_input_fails_closed_without_recording() {
        let (turnstile, _clock) = turnstile();

        let err = turnstile.check_signup("a@x.com", Some("not-an-ip")).unwrap_err();
        assert_eq!(err.message(), "Too many signup attempts. Please try again later.");
        assert_eq!(turnstile.rate_limiter().bucket_total(), 0);

        assert!(turnstile.check_username_change("").is_err());
        assert!(turnstile.check_oauth_callback("goo gle", "203.0.113.5").is_err());
        assert!(turnstile.check_password_reset_form("").is_err());
        assert_eq!(turnstile.rate_limiter().bucket_total(), 0);

        let err = turnstile.record_authentication("", false).unwrap_err();
        assert_eq!(err.message(), "Too many login attempts. Please try again later.");
    }

    #[test]
    fn test_oauth_buckets_are_provider_scoped() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..10 {
            turnstile.check_oauth_callback("google", "203.0.113.5").unwrap();
        }
        assert!(turnstile.check_oauth_callback("Google", "203.0.113.5").is_err());
        assert!(turnstile.check_oauth_callback("github", "203.0.113.5").is_ok());
        assert!(turnstile.check_oauth_initiation("google", "203.0.113.5").is_ok());

        assert_eq!(
            turnstile
                .rate_limiter()
                .bucket_count("oauth_callback:ip:google:203.0.113.5:1m", Duration::minutes(1)),
            10
        );
    }

    #[test]
    fn test_oauth_minute_tier_recovers() {
        let (turnstile, clock) = turnstile();

        for _ in 0..10 {
            turnstile.check_oauth_initiation("google", "203.0.113.5").unwrap();
        }
        assert!(turnstile.check_oauth_initiation("google", "203.0.113.5").is_err());

        clock.advance(Duration::seconds(61));
        assert!(turnstile.check_oauth_initiation("google", "203.0.113.5").is_ok());
    }

    #[test]
    fn test_username_change_weekly_tier() {
        let (turnstile, clock) = turnstile();

        // Three per hour and five per day, spread so only the weekly tier can bind
        for _ in 0..10 {
            turnstile.check_username_change("usr_1").unwrap();
            clock.advance(Duration::hours(12));
        }
        assert!(turnstile.check_username_change("usr_1").is_err());
    }

    #[test]
    fn test_caldav_ip_tier() {
        let (turnstile, clock) = turnstile();

        for i in 0..50 {
            turnstile
                .check_caldav_connection_test(&format!("usr_{i}"), Some("203.0.113.5"))
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let err = turnstile
            .check_caldav_connection_test("usr_new", Some("203.0.113.5"))
            .unwrap_err();
        assert_eq!(err.message(), "Too many connection tests. Please try again later.");
    }

    #[test]
    fn test_calendar_and_video_buckets_are_separate() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..5 {
            turnstile.check_calendar_discovery("usr_1").unwrap();
        }
        assert!(turnstile.check_calendar_discovery("usr_1").is_err());
        assert!(turnstile.check_video_connection_test("usr_1").is_ok());
    }

    #[test]
    fn test_password_reset_request_and_form() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..3 {
            turnstile
                .check_password_reset_request("a@x.com", Some("203.0.113.5"))
                .unwrap();
        }
        let err = turnstile
            .check_password_reset_request("a@x.com", Some("203.0.113.5"))
            .unwrap_err();
        assert_eq!(
            err.message(),
            "Too many password reset requests. Please try again later."
        );

        for _ in 0..10 {
            turnstile.check_password_reset_form("203.0.113.5").unwrap();
        }
        assert!(turnstile.check_password_reset_form("203.0.113.5").is_err());
    }

    #[test]
    fn test_email_verification_resend_ten_minute_tier() {
        let (turnstile, clock) = turnstile();

        for _ in 0..3 {
            turnstile.check_email_verification_resend("a@x.com", None).unwrap();
        }
        assert!(turnstile.check_email_verification_resend("a@x.com", None).is_err());

        clock.advance(Duration::minutes(11));
        assert!(turnstile.check_email_verification_resend("a@x.com", None).is_ok());
    }

    #[test]
    fn test_payment_uses_configured_limits() {
        let clock = MockClock::default();
        let turnstile = Turnstile::builder()
            .with_config(TurnstileConfig::default().with_payment_limits(2, Duration::minutes(5)))
            .with_clock(clock.clone())
            .build()
            .unwrap();

        turnstile.check_payment_initiation("usr_1", Some("203.0.113.5")).unwrap();
        turnstile.check_payment_initiation("usr_1", Some("203.0.113.5")).unwrap();
        assert!(turnstile.check_payment_initiation("usr_1", Some("203.0.113.5")).is_err());

        // The IP allows twice the per-user limit
        turnstile.check_payment_initiation("usr_2", Some("203.0.113.5")).unwrap();
        turnstile.check_payment_initiation("usr_3", Some("203.0.113.5")).unwrap();
        assert!(turnstile.check_payment_initiation("usr_4", Some("203.0.113.5")).is_err());

        clock.advance(Duration::minutes(6));
        assert!(turnstile.check_payment_initiation("usr_1", Some("203.0.113.5")).is_ok());
    }

    #[test]
    fn test_clear_operation() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..3 {
            turnstile.check_username_change("usr_1").unwrap();
        }
        assert!(turnstile.check_username_change("usr_1").is_err());

        turnstile
            .clear_operation(Operation::UsernameChange, Dimension::User, "usr_1")
            .unwrap();
        assert!(turnstile.check_username_change("usr_1").is_ok());

        // Not a dimension of the operation
        assert!(
            turnstile
                .clear_operation(Operation::UsernameChange, Dimension::Ip, "203.0.113.5")
                .is_err()
        );
        // OAuth buckets need a provider
        assert!(
            turnstile
                .clear_operation(Operation::OAuthCallback, Dimension::Ip, "203.0.113.5")
                .is_err()
        );
    }

    #[test]
    fn test_clear_provider_operation() {
        let (turnstile, _clock) = turnstile();

        for _ in 0..10 {
            turnstile.check_oauth_callback("google", "203.0.113.5").unwrap();
        }
        turnstile
            .clear_provider_operation(Operation::OAuthCallback, "google", "203.0.113.5")
            .unwrap();
        assert!(turnstile.check_oauth_callback("google", "203.0.113.5").is_ok());
    }
}
