use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Reason why an identifier's failure history was cleared.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    /// A successful authentication cleared the history
    SuccessfulLogin,
    /// The account owner completed a password reset
    PasswordReset,
    /// An operator cleared the history manually
    AdminAction,
}

/// Security events published on every deny and lockout transition
///
/// Events carry the bucket dimension and counters needed for monitoring.
/// Lockout events carry the normalised identifier; rate-limit events only
/// carry the dimension name, never the value the bucket was keyed on.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A rate-limit tier denied a request.
    RateLimited {
        /// Protected operation, e.g. `signup`
        operation: String,
        /// Bucket dimension, e.g. `ip`
        dimension: String,
        /// Window label of the violated tier, e.g. `1h`
        window: String,
        /// Limit of the violated tier
        limit: u32,
        timestamp: DateTime<Utc>,
    },

    /// An authentication attempt failed and was recorded.
    LoginFailed {
        identifier: String,
        /// Failures inside the decision window, including this one
        recent_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// An identifier crossed into the throttled state.
    AccountThrottled {
        identifier: String,
        recent_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// An identifier crossed into the locked state.
    ///
    /// This is a security-critical event that should trigger alerts.
    AccountLocked {
        identifier: String,
        recent_failures: u32,
        lockout_minutes: u32,
        timestamp: DateTime<Utc>,
    },

    /// An identifier's failure history was cleared.
    AccountUnlocked {
        identifier: String,
        reason: UnlockReason,
        timestamp: DateTime<Utc>,
    },
}

/// Default number of events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out of [`Event`]s to monitoring consumers
///
/// Publishing never blocks and never fails the check that produced the event.
/// With no subscribers events are dropped; a subscriber that falls behind by
/// more than the capacity skips the oldest events (see
/// [`broadcast::error::RecvError::Lagged`]).
///
/// # Examples
///
/// ```
/// # use turnstile_core::events::{Event, EventBus, UnlockReason};
/// # use chrono::Utc;
/// let bus = EventBus::default();
/// let mut events = bus.subscribe();
///
/// bus.emit(Event::AccountUnlocked {
///     identifier: "alice@example.com".to_string(),
///     reason: UnlockReason::AdminAction,
///     timestamp: Utc::now(),
/// });
///
/// assert!(matches!(events.try_recv(), Ok(Event::AccountUnlocked { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a new event bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new consumer
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: Event) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers, dropping security event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Convert a clock reading into an event timestamp.
pub fn timestamp(now_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(now_ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked_event() -> Event {
        Event::AccountLocked {
            identifier: "a@x.com".to_string(),
            recent_failures: 20,
            lockout_minutes: 240,
            timestamp: timestamp(0),
        }
    }

    #[tokio::test]
    async fn test_event_bus_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);

        // Should not panic or error with no subscribers
        bus.emit(locked_event());
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(locked_event());

        assert_eq!(first.recv().await.unwrap(), locked_event());
        assert_eq!(second.recv().await.unwrap(), locked_event());
    }

    #[tokio::test]
    async fn test_clones_share_subscribers() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();

        bus.clone().emit(locked_event());
        assert_eq!(events.recv().await.unwrap(), locked_event());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(Event::RateLimited {
            operation: "signup".to_string(),
            dimension: "ip".to_string(),
            window: "1h".to_string(),
            limit: 8,
            timestamp: timestamp(0),
        })
        .unwrap();

        assert_eq!(json["event"], "rate_limited");
        assert_eq!(json["dimension"], "ip");
        assert_eq!(json["limit"], 8);
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn test_unlock_reason_serialization() {
        let json = serde_json::to_value(UnlockReason::PasswordReset).unwrap();
        assert_eq!(json, "password_reset");
    }
}
