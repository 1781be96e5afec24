//! Event Hub
//!
//! Fans [`AgentEvent`]s out to any number of subscribers over a tokio
//! broadcast channel. Publishing never blocks; a subscriber that falls
//! more than `capacity` events behind sees `RecvError::Lagged` and skips
//! ahead.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::application::events::AgentEvent;
use crate::application::ports::EventPublisher;
use crate::infrastructure::metrics;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast hub for agent events.
///
/// # Example
///
/// ```rust
/// use broker_token_agent::application::events::AgentEvent;
/// use broker_token_agent::application::ports::EventPublisher;
/// use broker_token_agent::infrastructure::broadcast::EventHub;
///
/// let hub = EventHub::with_defaults();
/// let mut rx = hub.subscribe();
///
/// hub.publish(AgentEvent::SessionRefreshed);
/// assert_eq!(rx.try_recv().unwrap(), AgentEvent::SessionRefreshed);
/// ```
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventHub {
    /// Create a hub whose channel holds `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Create a hub with [`DEFAULT_EVENT_CAPACITY`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }

    /// Get a new receiver. It only sees events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl EventPublisher for EventHub {
    fn publish(&self, event: AgentEvent) {
        metrics::record_event(event.kind());
        // No receivers is not an error: nobody is watching right now.
        if self.tx.send(event).is_err() {
            tracing::trace!("Event published with no subscribers");
        }
    }
}

/// Shared event hub reference.
pub type SharedEventHub = Arc<EventHub>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::broker::BrokerId;

    #[test]
    fn receiver_count_tracks_subscribers() {
        let hub = EventHub::with_defaults();
        assert_eq!(hub.receiver_count(), 0);

        let rx1 = hub.subscribe();
        let _rx2 = hub.subscribe();
        assert_eq!(hub.receiver_count(), 2);

        drop(rx1);
        assert_eq!(hub.receiver_count(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let hub = EventHub::with_defaults();
        hub.publish(AgentEvent::SessionRefreshed);
    }

    #[tokio::test]
    async fn every_subscriber_gets_the_event() {
        let hub = EventHub::with_defaults();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();

        let event = AgentEvent::TokenExpired {
            broker_id: BrokerId::new("42"),
        };
        hub.publish(event.clone());

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe();

        for _ in 0..3 {
            hub.publish(AgentEvent::SessionRefreshed);
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap(), AgentEvent::SessionRefreshed);
    }
}
