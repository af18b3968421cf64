use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub keyed by mentor. Every committed event is published here;
/// this is the signal surface other bounded contexts (payments, profiles,
/// community) read session status changes from.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a mentor's events. Creates the channel if needed.
    pub fn subscribe(&self, mentor_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(mentor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, mentor_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&mentor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a mentor is retired).
    pub fn remove(&self, mentor_id: &Ulid) {
        self.channels.remove(mentor_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mentor_id = Ulid::new();
        let mut rx = hub.subscribe(mentor_id);

        let event = Event::MentorRegistered {
            id: mentor_id,
            login: "amy".into(),
            name: "Amy".into(),
        };
        hub.send(mentor_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let mentor_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            mentor_id,
            &Event::RuleCleared {
                mentor_id,
                day: 1,
            },
        );
    }
}
