//! The "deferred job": send a request now, await its out-of-band reply later,
//! as one timeout-bounded operation.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::bus::{BusError, NotificationBus, SubscriptionId};
use crate::errors::EngineError;

/// One correlated request-reply exchange.
///
/// The subscription is established **before** the request is sent, so a
/// counter-party that replies faster than we return from the send can never
/// slip a message past us. Exactly one of {reply, timeout, send-error}
/// resolves the job, and the subscription is torn down exactly once on every
/// path.
pub struct CorrelationJob<'a> {
    bus: &'a dyn NotificationBus,
    channel: String,
    timeout: Duration,
}

impl<'a> CorrelationJob<'a> {
    pub fn new(bus: &'a dyn NotificationBus, channel: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bus,
            channel: channel.into(),
            timeout,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Run the exchange: subscribe, send, then race the correlated reply
    /// against the timeout. `on_reply` reshapes the raw message into the
    /// caller's domain type; its failures surface as reply-processing errors,
    /// distinct from transport-level send failures.
    pub async fn execute<S, SF, R, RF, T>(self, send_request: S, on_reply: R) -> Result<T, EngineError>
    where
        S: FnOnce(String) -> SF,
        SF: Future<Output = anyhow::Result<()>>,
        R: FnOnce(Value) -> RF,
        RF: Future<Output = Result<T, EngineError>>,
    {
        let mut subscription = self.bus.subscribe(&self.channel).await?;
        debug!(
            channel = %self.channel,
            subscription_id = %subscription.id,
            "subscribed ahead of send"
        );

        if let Err(err) = send_request(self.channel.clone()).await {
            self.unsubscribe(subscription.id).await;
            return Err(EngineError::Send {
                channel: self.channel,
                source: err,
            });
        }

        tokio::select! {
            message = subscription.receiver.recv() => {
                self.unsubscribe(subscription.id).await;
                match message {
                    Some(message) => on_reply(message).await,
                    None => Err(EngineError::Bus(BusError::ChannelClosed {
                        channel: self.channel,
                    })),
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                self.unsubscribe(subscription.id).await;
                Err(EngineError::CorrelationTimeout {
                    channel: self.channel,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Tear down the subscription. An unsubscribe failure cannot change the
    /// job's outcome, so it is logged rather than raised.
    async fn unsubscribe(&self, id: SubscriptionId) {
        if let Err(err) = self.bus.unsubscribe(&self.channel, id).await {
            warn!(channel = %self.channel, error = %err, "unsubscribe failed");
        }
    }
}
