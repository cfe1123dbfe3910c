//! Queue publisher with a self-healing connection.
//!
//! The publisher dials the broker lazily on the first publish, caches the
//! connection and channel across calls, and classifies every failure before
//! deciding what the next call should do. There is no background reconnect
//! task and no backoff timer; reconnection is driven entirely by the next
//! publish call, so an idle publisher has no side effects.

use std::mem;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::broker::amqp::AmqpTransport;
use crate::broker::endpoint::BrokerEndpoint;
use crate::broker::settings::QueueSettings;
use crate::broker::transport::BrokerTransport;
use crate::broker::{BrokerError, ChannelHandle};

/// Connection lifecycle of a publisher.
///
/// Every transition goes through [`Publisher::publish_in`], which takes the
/// current state by value and hands back the next one.
enum EndpointState {
    /// No cached resources. The next publish dials the broker.
    Unconnected,
    /// Cached connection and channel from the last successful call.
    Connected(ChannelHandle),
    /// A permanent failure is latched; every call returns it unchanged.
    FailedPermanent(BrokerError),
}

/// Publisher bound to one queue on one broker.
///
/// Transient failures (broker unreachable, channel refused, send failed)
/// leave the publisher retryable: the next [`publish`](Self::publish) starts
/// over from a clean slate. A rejected queue declaration latches instead,
/// and every later call fails immediately with the stored error without
/// touching the network. A latched publisher must be dropped and rebuilt;
/// there is no reset operation.
///
/// # Example
///
/// ```rust,ignore
/// let publisher = Publisher::new(endpoint, QueueSettings::new("jobs"));
/// publisher.publish(br#"{"job":42}"#).await?;
/// publisher.close().await;
/// ```
pub struct Publisher {
    endpoint: BrokerEndpoint,
    settings: QueueSettings,
    transport: Arc<dyn BrokerTransport>,
    state: Mutex<EndpointState>,
}

impl Publisher {
    /// Publisher over the production AMQP transport.
    ///
    /// Construction performs no I/O; the first publish dials the broker.
    pub fn new(endpoint: BrokerEndpoint, settings: QueueSettings) -> Self {
        Self::with_transport(endpoint, settings, Arc::new(AmqpTransport::new()))
    }

    /// Publisher over a caller-supplied transport.
    pub fn with_transport(
        endpoint: BrokerEndpoint,
        settings: QueueSettings,
        transport: Arc<dyn BrokerTransport>,
    ) -> Self {
        Self {
            endpoint,
            settings,
            transport,
            state: Mutex::new(EndpointState::Unconnected),
        }
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Send `payload` to the configured queue.
    ///
    /// Payload bytes pass through unmodified and are sent with content type
    /// `application/json`. Connects on first use, reuses the cached channel
    /// afterwards with no per-call health probe, and reports failures
    /// according to their class: transient errors are worth retrying with
    /// another call, a latched permanent error is not.
    pub async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        let current = mem::replace(&mut *state, EndpointState::Unconnected);
        let (next, result) = self.publish_in(current, payload).await;
        *state = next;
        result
    }

    /// Single transition function: current state in, next state and the
    /// caller's result out.
    async fn publish_in(
        &self,
        state: EndpointState,
        payload: &[u8],
    ) -> (EndpointState, Result<(), BrokerError>) {
        let handle = match state {
            EndpointState::FailedPermanent(error) => {
                return (EndpointState::FailedPermanent(error.clone()), Err(error));
            }
            EndpointState::Connected(handle) => handle,
            EndpointState::Unconnected => {
                let established = ChannelHandle::establish(
                    self.transport.as_ref(),
                    &self.endpoint,
                    &self.settings,
                )
                .await;
                match established {
                    Ok(handle) => {
                        tracing::info!(
                            endpoint = %self.endpoint,
                            queue = %self.settings.queue,
                            "Publisher connected"
                        );
                        handle
                    }
                    Err(error) if error.is_transient() => {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            error = %error,
                            "Broker unavailable, will retry on next publish"
                        );
                        return (EndpointState::Unconnected, Err(error));
                    }
                    Err(error) => {
                        tracing::error!(
                            queue = %self.settings.queue,
                            error = %error,
                            "Queue declaration rejected, publisher failed permanently"
                        );
                        return (EndpointState::FailedPermanent(error.clone()), Err(error));
                    }
                }
            }
        };

        match handle
            .channel()
            .publish(&self.settings.exchange, &self.settings.routing_key, payload)
            .await
        {
            Ok(()) => {
                tracing::debug!(
                    queue = %self.settings.queue,
                    bytes = payload.len(),
                    "Message published"
                );
                (EndpointState::Connected(handle), Ok(()))
            }
            Err(source) => {
                // The cached pair is no longer trustworthy after a send
                // failure; release it so the next call reconnects.
                handle.shutdown().await;
                let error = BrokerError::Publish {
                    exchange: self.settings.exchange.clone(),
                    routing_key: self.settings.routing_key.clone(),
                    source,
                };
                tracing::warn!(
                    queue = %self.settings.queue,
                    error = %error,
                    "Publish failed, cached connection discarded"
                );
                (EndpointState::Unconnected, Err(error))
            }
        }
    }

    /// Release the cached connection, if one exists.
    ///
    /// Idempotent and infallible. A publisher that never connected performs
    /// no network activity here. A latched permanent failure stays latched:
    /// close releases resources, it does not un-fail the instance.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        match mem::replace(&mut *state, EndpointState::Unconnected) {
            EndpointState::Connected(handle) => {
                handle.shutdown().await;
                tracing::debug!(queue = %self.settings.queue, "Publisher closed");
            }
            EndpointState::FailedPermanent(error) => {
                *state = EndpointState::FailedPermanent(error);
            }
            EndpointState::Unconnected => {}
        }
    }
}
