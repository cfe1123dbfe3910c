//! Queue consumer producing a message stream.
//!
//! A consumer owns at most one broker connection at a time. `consume()`
//! builds the connection, declares the queue and registers the subscription,
//! handing back a stream that lives until the connection goes away. Unlike
//! the publisher there is no latched failure state: any failure is returned
//! to the caller and the instance stays safe to call again.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::broker::amqp::AmqpTransport;
use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::settings::{ConsumerSettings, QueueSettings};
use crate::broker::transport::{BrokerTransport, MessageStream};
use crate::broker::{BrokerError, ChannelHandle};

/// Consumer bound to one queue on one broker.
///
/// [`consume`](Self::consume) yields a lazy, order-preserving stream of
/// inbound messages tied to the connection that produced it. The stream is
/// not restartable: once [`close`](Self::close) runs, or the broker drops
/// the connection, the stream ends and a fresh `consume` call is needed.
/// Close can safely be called from another task while the owner is blocked
/// reading the stream; the pending read resolves to end-of-stream.
pub struct Consumer {
    endpoint: BrokerEndpoint,
    queue: QueueSettings,
    settings: ConsumerSettings,
    transport: Arc<dyn BrokerTransport>,
    handle: Mutex<Option<ChannelHandle>>,
}

impl Consumer {
    /// Consumer over the production AMQP transport.
    ///
    /// `queue` must match the declaration the publishing side uses; the
    /// broker rejects a redeclaration with different settings.
    pub fn new(endpoint: BrokerEndpoint, queue: QueueSettings, settings: ConsumerSettings) -> Self {
        Self::with_transport(endpoint, queue, settings, Arc::new(AmqpTransport::new()))
    }

    /// Consumer over a caller-supplied transport.
    pub fn with_transport(
        endpoint: BrokerEndpoint,
        queue: QueueSettings,
        settings: ConsumerSettings,
        transport: Arc<dyn BrokerTransport>,
    ) -> Self {
        Self {
            endpoint,
            queue,
            settings,
            transport,
            handle: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Connect, declare the queue and register the subscription.
    ///
    /// Returns the delivery stream. Calling this while a previous
    /// subscription is active supersedes it: the old connection is released
    /// first, ending the old stream. On failure the consumer holds no
    /// connection and the call can simply be repeated.
    pub async fn consume(&self) -> Result<MessageStream, BrokerError> {
        let mut handle = self.handle.lock().await;

        if let Some(previous) = handle.take() {
            previous.shutdown().await;
            tracing::debug!(queue = %self.settings.queue, "Superseded previous subscription");
        }

        let established =
            ChannelHandle::establish(self.transport.as_ref(), &self.endpoint, &self.queue).await?;

        let stream = match established.channel().consume(&self.settings).await {
            Ok(stream) => stream,
            Err(source) => {
                established.shutdown().await;
                return Err(BrokerError::Consume {
                    queue: self.settings.queue.clone(),
                    source,
                });
            }
        };

        tracing::info!(
            endpoint = %self.endpoint,
            queue = %self.settings.queue,
            "Consumer registered"
        );
        *handle = Some(established);
        Ok(stream)
    }

    /// Release the connection behind the active stream, if any.
    ///
    /// Idempotent and infallible; a consumer that never subscribed performs
    /// no network activity here. The active stream, wherever it is being
    /// read, terminates without an error element.
    pub async fn close(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(active) = handle.take() {
            active.shutdown().await;
            tracing::debug!(queue = %self.settings.queue, "Consumer closed");
        }
    }
}
