//! Transport seam for broker access.
//!
//! Publishers and consumers talk to the broker exclusively through the traits
//! in this module, so the same lifecycle and classification logic runs over
//! the real AMQP client ([`amqp`](crate::broker::amqp)), the in-process
//! broker ([`memory`](crate::broker::memory)), or a scripted test double.
//!
//! A transport hands out connections; a connection hands out channels; a
//! channel carries the declare/publish/consume operations. Closing is
//! best-effort and never fails; a connection or channel that is already gone
//! has nothing left to release.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::broker::settings::{ConsumerSettings, QueueSettings};

/// Failure reported by a transport operation.
///
/// Cloneable so a failure recorded as sticky publisher state can be handed
/// back to every subsequent caller by value.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Error surfaced by the AMQP driver.
    #[error(transparent)]
    Amqp(#[from] lapin::Error),

    /// The connection or channel was closed underneath the operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// Transport-specific failure with no AMQP representation.
    #[error("{0}")]
    Other(String),
}

/// Entry point of a transport: dials broker connections.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establish a connection to the broker at `uri`.
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// An established broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a multiplexed channel on this connection.
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// Close the connection and release its socket. Never fails; closing a
    /// dead connection is a no-op.
    async fn close(&self);
}

/// A channel carrying declare, publish and consume operations.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare the queue described by `settings`. Redeclaring with identical
    /// settings is idempotent; a mismatch is a broker-side topology error.
    async fn declare_queue(&self, settings: &QueueSettings) -> Result<(), TransportError>;

    /// Publish `payload` to `exchange` under `routing_key`. The payload bytes
    /// pass through unmodified.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    /// Register a consumer and return its delivery stream. The stream ends,
    /// without an error element, when the underlying connection goes away.
    async fn consume(&self, settings: &ConsumerSettings) -> Result<MessageStream, TransportError>;

    /// Close the channel. Never fails.
    async fn close(&self);
}

/// Lazy, unbounded, order-preserving sequence of inbound messages.
///
/// Tied to the lifetime of the connection that produced it: once that
/// connection closes, the stream terminates and a fresh `consume()` call is
/// needed to obtain a new one.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Settlement handle for a single delivery.
#[async_trait]
pub trait MessageAck: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;
    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;
}

/// A message delivered to a consumer.
pub struct InboundMessage {
    payload: Vec<u8>,
    routing_key: String,
    delivery_tag: u64,
    redelivered: bool,
    acker: Option<Arc<dyn MessageAck>>,
}

impl InboundMessage {
    /// Build a delivery. `acker` is `None` for auto-acked subscriptions,
    /// in which case [`ack`](Self::ack) and [`nack`](Self::nack) are no-ops.
    pub fn new(
        payload: Vec<u8>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Option<Arc<dyn MessageAck>>,
    ) -> Self {
        Self {
            payload,
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered,
            acker,
        }
    }

    /// Raw payload bytes, exactly as published.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the message, keeping only the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge the delivery. No-op under auto-ack.
    pub async fn ack(&self) -> Result<(), TransportError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery, optionally asking the broker to requeue it.
    /// No-op under auto-ack.
    pub async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        match &self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("payload_len", &self.payload.len())
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_accessors() {
        let message = InboundMessage::new(b"{}".to_vec(), "jobs", 7, true, None);
        assert_eq!(message.payload(), b"{}");
        assert_eq!(message.routing_key(), "jobs");
        assert_eq!(message.delivery_tag(), 7);
        assert!(message.redelivered());
        assert_eq!(message.into_payload(), b"{}".to_vec());
    }

    #[tokio::test]
    async fn test_ack_without_acker_is_noop() {
        let message = InboundMessage::new(Vec::new(), "jobs", 1, false, None);
        assert!(message.ack().await.is_ok());
        assert!(message.nack(true).await.is_ok());
    }

    #[test]
    fn test_debug_omits_payload_bytes() {
        let message = InboundMessage::new(b"secret".to_vec(), "jobs", 1, false, None);
        let shown = format!("{message:?}");
        assert!(shown.contains("payload_len"));
        assert!(!shown.contains("secret"));
    }
}
