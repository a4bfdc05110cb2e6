//! Status views and the event feed.
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`]:
//! - publishing never blocks and drops the event when nobody listens,
//! - a receiver only sees events sent after it subscribed,
//! - slow receivers observe `RecvError::Lagged(n)` and skip the oldest `n`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::BufferEvent;

/// Per-subject snapshot.
///
/// `waiting + running` equals the pending count reported by events and
/// `get_pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Pending and not yet handed to a worker.
    pub waiting: usize,
    pub running: usize,
    pub processed: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Everything still in the pending list, running or not.
    pub fn pending(&self) -> usize {
        self.waiting + self.running
    }
}

#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<BufferEvent>,
}

impl EventBus {
    /// Capacity is shared across receivers and clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: BufferEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BufferEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventKind, Subject};

    fn event(kind: EventKind) -> BufferEvent {
        BufferEvent::new(Subject::parse("s").unwrap(), kind, 0, 0)
    }

    #[tokio::test]
    async fn subscribers_receive_events_published_after_subscribe() {
        let bus = EventBus::new(8);
        bus.publish(event(EventKind::Started));

        let mut rx = bus.subscribe();
        bus.publish(event(EventKind::Added));

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Added);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_receivers_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(event(EventKind::Added));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        let bus = EventBus::new(0);
        bus.publish(event(EventKind::Completed));
    }

    #[test]
    fn pending_includes_running() {
        let counts = QueueCounts {
            waiting: 2,
            running: 1,
            ..Default::default()
        };
        assert_eq!(counts.pending(), 3);
        assert_eq!(QueueCounts::default().pending(), 0);
    }
}
