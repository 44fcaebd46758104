//! Fan-out of state-change events to many subscribers, non-blocking.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::types::{HealthStatus, ServiceKind, ServiceLabel, ServiceState};

/// Per-subscriber channel capacity. A slow subscriber drops events past
/// this rather than stalling the publisher.
const SUBSCRIBER_BUFFER: usize = 100;

/// One observed state transition, optionally grouped with others from the
/// same cascade via `correlation_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeEvent {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub old_state: ServiceState,
    pub new_state: ServiceState,
    pub health: HealthStatus,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Ties every event produced by one cascade invocation together so
    /// subscribers can group them; `None` for non-cascade transitions.
    pub correlation_id: Option<Uuid>,
}

/// Single-producer-multi-consumer fan-out. Owns the subscriber list;
/// subscribers own the receiving half of their channel.
///
/// Guarded by a plain `std::sync::Mutex` rather than an async one: every
/// critical section here is a short, non-blocking `Vec` operation, so
/// publish can run synchronously from inside a service's state-change
/// callback without an `.await` point — publishing must never block
/// the state-transition that triggered it.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::Sender<StateChangeEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber, returning the receiving end of its channel.
    pub fn subscribe(&self) -> mpsc::Receiver<StateChangeEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.lock().expect("subscribers lock poisoned").push(tx);
        rx
    }

    /// Offer `event` to every subscriber without blocking the caller. A full
    /// subscriber buffer drops the event for that subscriber only.
    pub fn publish(&self, event: StateChangeEvent) {
        // Snapshot the subscriber list under the lock, then send without it,
        // so a stalled subscriber can never block new Subscribe calls.
        let subscribers = self.subscribers.lock().expect("subscribers lock poisoned").clone();
        for subscriber in &subscribers {
            if subscriber.try_send(event.clone()).is_err() {
                debug!(label = %event.label, "dropping event for a full or closed subscriber");
            }
        }
    }

    /// Number of currently registered subscribers (includes closed ones
    /// until the next publish reaps them — reaping is not required by the
    /// contract and is skipped for simplicity).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscribers lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(label: &str) -> StateChangeEvent {
        StateChangeEvent {
            label: ServiceLabel::new(label),
            kind: ServiceKind::KubeConnection,
            old_state: ServiceState::Starting,
            new_state: ServiceState::Running,
            health: HealthStatus::Healthy,
            error: None,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_published_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(sample_event("mc-t"));
        assert_eq!(a.recv().await.unwrap().label, ServiceLabel::new("mc-t"));
        assert_eq!(b.recv().await.unwrap().label, ServiceLabel::new("mc-t"));
    }

    #[tokio::test]
    async fn a_full_subscriber_only_drops_its_own_events() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            bus.publish(sample_event(&format!("svc-{i}")));
        }

        // The fast subscriber's buffer also caps at SUBSCRIBER_BUFFER, but it
        // was drained concurrently with publishing in a real consumer; here
        // we only assert that publish never blocked (the loop above returned)
        // and that both receivers still observe their oldest buffered event.
        assert_eq!(fast.recv().await.unwrap().label, ServiceLabel::new("svc-0"));
        assert_eq!(slow.recv().await.unwrap().label, ServiceLabel::new("svc-0"));
    }

    #[test]
    fn subscribing_increases_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }
}
