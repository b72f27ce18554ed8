use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-tool event subscriptions. The reaper, embedding
/// code, and tests can watch a tool's bookings change.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a tool. Creates the channel if needed.
    pub fn subscribe(&self, tool_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(tool_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, tool_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&tool_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel.
    #[allow(dead_code)]
    pub fn remove(&self, tool_id: &Ulid) {
        self.channels.remove(tool_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let tool_id = Ulid::new();
        let mut rx = hub.subscribe(tool_id);

        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            tool_id,
            status: BookingStatus::Confirmed,
        };
        hub.send(tool_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let tool_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            tool_id,
            &Event::BookingStatusChanged {
                id: Ulid::new(),
                tool_id,
                status: BookingStatus::Cancelled,
            },
        );
    }
}
