//! Events emitted to the view and transport layers.
//!
//! Delivery is at-least-once per triggering condition; listeners must be
//! idempotent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::state::ExpiryReason;

/// Buffered events per subscriber before slow listeners start lagging.
const EVENT_CAPACITY: usize = 64;

/// A session lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionExpired {
        reason: ExpiryReason,
        timestamp: DateTime<Utc>,
    },
    IdleWarning {
        /// Countdown length in milliseconds
        remaining_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActivityDetected {
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Event name as seen by listeners.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::SessionExpired { .. } => "session-expired",
            SessionEvent::IdleWarning { .. } => "idle-warning",
            SessionEvent::ActivityDetected { .. } => "activity-detected",
        }
    }
}

/// Fan-out of session events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SessionEvent) {
        trace!(event = event.name(), "Emitting session event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::SessionExpired {
            reason: ExpiryReason::SessionTimeout,
            timestamp: crate::clock::to_datetime(0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "session-expired");
        assert_eq!(json["reason"], "session_timeout");
        assert_eq!(event.name(), "session-expired");
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::ActivityDetected {
            timestamp: crate::clock::to_datetime(5),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "activity-detected");
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new().emit(SessionEvent::ActivityDetected {
            timestamp: crate::clock::to_datetime(5),
        });
    }
}
