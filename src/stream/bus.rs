use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use super::events::StreamEvent;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<StreamEvent>)>,
}

/// Fan-out of [`StreamEvent`]s to any number of subscribers.
///
/// Delivery is unbounded so a slow subscriber never loses stream chunks; each subscriber sees
/// events in publish order.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.next_id += 1;
        let id = subs.next_id;
        subs.senders.push((id, tx));
        EventSubscription { id, rx, bus: Arc::downgrade(&self.subscribers) }
    }

    pub fn publish(&self, event: StreamEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.senders.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).senders.len()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct EventSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    bus: Weak<Mutex<Subscribers>>,
}

impl EventSubscription {
    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.bus.upgrade() {
            let mut subs = subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.senders.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(StreamEvent::Connected);
        bus.publish(StreamEvent::Disconnected { reason: "bye".into() });

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(StreamEvent::Connected));
            assert_eq!(
                sub.recv().await,
                Some(StreamEvent::Disconnected { reason: "bye".into() })
            );
        }
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let bus = EventBus::new();
        let first = bus.subscribe();
        let _second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn subscription_outliving_the_bus_is_harmless() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.try_recv(), None);
    }
}
