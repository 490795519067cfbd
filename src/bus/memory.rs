use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{BusError, NotificationBus, Subscription, SubscriptionId};

const SUBSCRIPTION_BUFFER: usize = 16;

/// Process-local notification bus.
///
/// Channel names are independent between workflow instances by construction
/// (each derives its channel from a caller-supplied unique identifier), so a
/// plain map of channel name to subscriber senders is sufficient.
#[derive(Debug, Default)]
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, Vec<(SubscriptionId, mpsc::Sender<Value>)>>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a channel. Test helper.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |subs| subs.len())
    }
}

#[async_trait]
impl NotificationBus for InMemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);

        self.channels
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push((id, sender));

        debug!(channel = %channel, subscription_id = %id, "subscribed");
        Ok(Subscription { id, receiver })
    }

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), BusError> {
        let mut channels = self.channels.lock().await;
        if let Some(subs) = channels.get_mut(channel) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                channels.remove(channel);
            }
        }
        debug!(channel = %channel, subscription_id = %id, "unsubscribed");
        Ok(())
    }

    async fn publish(&self, channel: &str, message: Value) -> Result<usize, BusError> {
        let senders: Vec<mpsc::Sender<Value>> = {
            let channels = self.channels.lock().await;
            channels
                .get(channel)
                .map(|subs| subs.iter().map(|(_, tx)| tx.clone()).collect())
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for sender in senders {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }

        debug!(channel = %channel, delivered = %delivered, "published message");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("accounts_u1").await.unwrap();

        let delivered = bus.publish("accounts_u1", json!({"accounts": []})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(sub.receiver.recv().await, Some(json!({"accounts": []})));
    }

    #[tokio::test]
    async fn publish_without_subscriber_is_noop() {
        let bus = InMemoryBus::new();
        let delivered = bus.publish("nobody_home", json!(1)).await.unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = InMemoryBus::new();
        let sub = bus.subscribe("consents_c1").await.unwrap();
        assert_eq!(bus.subscriber_count("consents_c1").await, 1);

        bus.unsubscribe("consents_c1", sub.id).await.unwrap();
        assert_eq!(bus.subscriber_count("consents_c1").await, 0);

        let delivered = bus.publish("consents_c1", json!(1)).await.unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = InMemoryBus::new();
        let mut a = bus.subscribe("accounts_a").await.unwrap();
        let _b = bus.subscribe("accounts_b").await.unwrap();

        bus.publish("accounts_a", json!("for a")).await.unwrap();
        assert_eq!(a.receiver.recv().await, Some(json!("for a")));
        assert!(a.receiver.try_recv().is_err());
    }
}
