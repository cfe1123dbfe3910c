//! Declarative queue and consumer parameter sets.
//!
//! These structs carry AMQP declare/consume parameters verbatim; nothing here
//! talks to the network. Identity is field equality, and an instance is owned
//! by whichever publisher or consumer holds it.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Queue declaration and publish routing parameters.
///
/// `exchange` and `routing_key` are passed through to the broker unmodified;
/// an empty exchange means the default exchange, which routes by queue name.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct QueueSettings {
    pub queue: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub no_wait: bool,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl QueueSettings {
    /// Settings for publishing to `queue` through the default exchange.
    ///
    /// The routing key is set to the queue name, which is how the default
    /// exchange routes. Adjust individual fields afterwards for anything
    /// fancier.
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            routing_key: queue.clone(),
            queue,
            ..Self::default()
        }
    }
}

/// Consumer registration parameters.
///
/// An empty `consumer_tag` lets the broker assign one. With `auto_ack` set
/// the broker considers every delivery settled on send; otherwise the caller
/// acks each [`InboundMessage`](crate::broker::InboundMessage) explicitly.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ConsumerSettings {
    pub queue: String,
    #[serde(default)]
    pub consumer_tag: String,
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub no_local: bool,
    #[serde(default)]
    pub no_wait: bool,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl ConsumerSettings {
    /// Settings for a broker-tagged, manually acked consumer on `queue`.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }
}
