//! Typed view-change notifications, produced at flush boundaries.
//!
//! A thin wrapper over `tokio::sync::broadcast`, matching the "event
//! emitter" pattern the redesign notes call for: subscribers that lag too
//! far behind simply miss old events rather than block the apply loop.

use syncbase_sdk::codec::ActionType;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// A log entry was validated and its handler ran.
    Applied { action_type: ActionType },
    /// The view reached a flush boundary; readers may observe new state.
    Flushed,
}

pub struct EventBus {
    sender: broadcast::Sender<ViewEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish: no subscribers is not an error.
    pub fn publish(&self, event: ViewEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(ViewEvent::Applied {
            action_type: ActionType::CreateServer,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ViewEvent::Applied {
                action_type: ActionType::CreateServer
            }
        );
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(ViewEvent::Flushed);
    }
}
