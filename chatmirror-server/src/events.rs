//! In-process publish/subscribe fan-out addressed by session id.

use chatmirror_core::protocol::SessionEvent;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Sink the engine publishes session events into. Delivery is at most once
/// and fire-and-forget.
pub trait EventSink: Send + Sync {
    fn publish(&self, session_id: Uuid, event: SessionEvent);

    /// Releases whatever the sink holds for a session that no longer exists.
    fn remove(&self, session_id: Uuid);
}

/// One broadcast channel per session. Events published while nobody is
/// subscribed are dropped, and slow subscribers may lag.
pub struct EventBus {
    channels: DashMap<Uuid, broadcast::Sender<SessionEvent>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<SessionEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.channels
            .get(&session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl EventSink for EventBus {
    fn publish(&self, session_id: Uuid, event: SessionEvent) {
        let name = event.name();
        let delivered = match self.channels.get(&session_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        };
        trace!(%session_id, event = name, delivered, "Published session event");
    }

    /// Drops the session's channel. Existing receivers see it close.
    fn remove(&self, session_id: Uuid) {
        self.channels.remove(&session_id);
    }
}
