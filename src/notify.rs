use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ResourceKey};

const CHANNEL_CAPACITY: usize = 256;

/// Change feed per resource calendar (a room, a lecturer or a student).
pub struct NotifyHub {
    channels: DashMap<ResourceKey, broadcast::Sender<Event>>,
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

    /// Subscribe to changes on a resource. Creates the channel if needed.
    pub fn subscribe(&self, key: ResourceKey) -> broadcast::Receiver<Event> {
        self.channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: &ResourceKey, event: &Event) {
        if let Some(sender) = self.channels.get(key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let key = ResourceKey::Room("R1".into());
        let mut rx = hub.subscribe(key.clone());

        let event = Event::LectureCancelled { id: Ulid::new() };
        hub.send(&key, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_resources_are_not_notified() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(ResourceKey::Room("R1".into()));
        hub.send(
            &ResourceKey::Room("R2".into()),
            &Event::LectureCancelled { id: Ulid::new() },
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(
            &ResourceKey::Student(Ulid::new()),
            &Event::LectureCancelled { id: Ulid::new() },
        );
        assert_eq!(hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe(ResourceKey::Lecturer(Ulid::new()));
        let _kept = hub.subscribe(ResourceKey::Lecturer(Ulid::new()));
        drop(rx);
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
    }
}
