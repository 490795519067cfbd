//! Publish/subscribe contract used for request-response correlation.
//!
//! Replies from counter-parties arrive on a different HTTP connection than
//! the request that caused them; the HTTP layer publishes each reply onto a
//! channel named after the domain identifier, and the engine awaits it there.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod memory;

pub use memory::InMemoryBus;

pub type SubscriptionId = u64;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel '{channel}' was closed while awaiting a message")]
    ChannelClosed { channel: String },

    #[error("bus backend error: {reason}")]
    Backend { reason: String },
}

/// A live subscription: the id used to unsubscribe plus the message stream.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<Value>,
}

/// Notification bus contract.
///
/// Delivery to a channel with no subscriber is a no-op, not an error — the
/// subscribe-before-send invariant in the correlation primitive is what makes
/// a missed message a caller bug rather than a bus concern.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError>;

    async fn unsubscribe(&self, channel: &str, id: SubscriptionId) -> Result<(), BusError>;

    /// Publish a message, returning the number of subscribers it reached.
    async fn publish(&self, channel: &str, message: Value) -> Result<usize, BusError>;
}
