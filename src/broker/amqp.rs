//! AMQP 0-9-1 transport backed by `lapin`.
//!
//! This is the production implementation of the transport seam. It maps the
//! declarative [`QueueSettings`]/[`ConsumerSettings`] structs onto the wire
//! options one-to-one and fixes the published content type to
//! `application/json`; payload bytes themselves pass through untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde_json::Value;

use crate::broker::settings::{ConsumerSettings, QueueSettings};
use crate::broker::transport::{
    BrokerChannel, BrokerConnection, BrokerTransport, InboundMessage, MessageAck, MessageStream,
    TransportError,
};

/// Content type stamped on every published message.
const CONTENT_TYPE_JSON: &str = "application/json";

/// Normal-close reply code sent when tearing down channels and connections.
const CLOSE_REPLY_SUCCESS: u16 = 200;

/// Transport that dials real brokers over AMQP 0-9-1.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmqpTransport;

impl AmqpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn connect(&self, uri: &str) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let connection = Connection::connect(uri, ConnectionProperties::default()).await?;
        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) {
        if let Err(err) = self.connection.close(CLOSE_REPLY_SUCCESS, "").await {
            tracing::debug!(error = %err, "Broker connection close failed");
        }
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(&self, settings: &QueueSettings) -> Result<(), TransportError> {
        let options = QueueDeclareOptions {
            passive: false,
            durable: settings.durable,
            exclusive: settings.exclusive,
            auto_delete: settings.auto_delete,
            nowait: settings.no_wait,
        };
        self.channel
            .queue_declare(&settings.queue, options, field_table(&settings.arguments))
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into()),
            )
            .await?;
        confirm.await?;
        Ok(())
    }

    async fn consume(&self, settings: &ConsumerSettings) -> Result<MessageStream, TransportError> {
        let options = BasicConsumeOptions {
            no_local: settings.no_local,
            no_ack: settings.auto_ack,
            exclusive: settings.exclusive,
            nowait: settings.no_wait,
        };
        let mut deliveries = self
            .channel
            .basic_consume(
                &settings.queue,
                &settings.consumer_tag,
                options,
                field_table(&settings.arguments),
            )
            .await?;

        let auto_ack = settings.auto_ack;
        let stream = async_stream::stream! {
            while let Some(result) = deliveries.next().await {
                match result {
                    Ok(delivery) => yield inbound(delivery, auto_ack),
                    Err(err) => {
                        // The connection went away; the sequence simply ends.
                        tracing::debug!(error = %err, "Consumer delivery stream ended");
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        if let Err(err) = self.channel.close(CLOSE_REPLY_SUCCESS, "").await {
            tracing::debug!(error = %err, "Broker channel close failed");
        }
    }
}

fn inbound(delivery: Delivery, auto_ack: bool) -> InboundMessage {
    let Delivery {
        delivery_tag,
        routing_key,
        redelivered,
        data,
        acker,
        ..
    } = delivery;
    let acker: Option<Arc<dyn MessageAck>> = if auto_ack {
        None
    } else {
        Some(Arc::new(AmqpAck { acker }))
    };
    InboundMessage::new(data, routing_key.as_str(), delivery_tag, redelivered, acker)
}

struct AmqpAck {
    acker: Acker,
}

#[async_trait]
impl MessageAck for AmqpAck {
    async fn ack(&self) -> Result<(), TransportError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

/// Convert a JSON argument map into an AMQP field table.
///
/// Scalars map directly; arrays and objects recurse. Null becomes Void, the
/// closest thing the wire format has.
fn field_table(arguments: &BTreeMap<String, Value>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments {
        table.insert(key.clone().into(), amqp_value(value));
    }
    table
}

fn amqp_value(value: &Value) -> AMQPValue {
    match value {
        Value::Null => AMQPValue::Void,
        Value::Bool(flag) => AMQPValue::Boolean(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => AMQPValue::LongLongInt(int),
            None => AMQPValue::Double(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => AMQPValue::LongString(text.clone().into()),
        Value::Array(items) => {
            AMQPValue::FieldArray(items.iter().map(amqp_value).collect::<Vec<_>>().into())
        }
        Value::Object(map) => {
            let mut nested = FieldTable::default();
            for (key, value) in map {
                nested.insert(key.clone().into(), amqp_value(value));
            }
            AMQPValue::FieldTable(nested)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;
    use serde_json::json;

    fn arguments(value: Value) -> BTreeMap<String, Value> {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected a JSON object"),
        }
    }

    fn entry<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
        table.inner().get(&ShortString::from(key))
    }

    #[test]
    fn test_field_table_scalars() {
        let table = field_table(&arguments(json!({
            "x-message-ttl": 60000,
            "x-queue-mode": "lazy",
            "x-single-active-consumer": true,
            "x-ratio": 0.5
        })));

        assert_eq!(
            entry(&table, "x-message-ttl"),
            Some(&AMQPValue::LongLongInt(60000))
        );
        assert_eq!(
            entry(&table, "x-queue-mode"),
            Some(&AMQPValue::LongString("lazy".into()))
        );
        assert_eq!(
            entry(&table, "x-single-active-consumer"),
            Some(&AMQPValue::Boolean(true))
        );
        assert_eq!(entry(&table, "x-ratio"), Some(&AMQPValue::Double(0.5)));
    }

    #[test]
    fn test_field_table_null_becomes_void() {
        let table = field_table(&arguments(json!({ "x-opt": null })));
        assert_eq!(entry(&table, "x-opt"), Some(&AMQPValue::Void));
    }

    #[test]
    fn test_field_table_recurses() {
        let table = field_table(&arguments(json!({
            "x-list": [1, "two"],
            "x-nested": { "inner": true }
        })));

        match entry(&table, "x-list") {
            Some(AMQPValue::FieldArray(items)) => {
                assert_eq!(items.as_slice().len(), 2);
            }
            other => panic!("expected field array, got {other:?}"),
        }
        match entry(&table, "x-nested") {
            Some(AMQPValue::FieldTable(nested)) => {
                assert_eq!(
                    nested.inner().get(&ShortString::from("inner")),
                    Some(&AMQPValue::Boolean(true))
                );
            }
            other => panic!("expected field table, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_arguments_give_empty_table() {
        let table = field_table(&BTreeMap::new());
        assert!(table.inner().is_empty());
    }
}
