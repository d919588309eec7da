//! In-process topic broker for development and tests.
//!
//! Mirrors the AMQP semantics the service relies on:
//! - Topic exchanges with `*` / `#` binding patterns
//! - Durable queues that buffer messages until a consumer takes them
//! - Manual acknowledgement, with requeued messages returned to the head of
//!   the queue and flagged as redelivered
//!
//! A broker built with [`InMemoryBroker::with_publish_log`] also records every
//! publish, so tests can assert on what left the webhook path without running a
//! consumer. The default broker keeps nothing once a message is consumed.

use crate::consumer::{dispatch, Disposition, HandlerMap, MessageConsumer};
use crate::error::BusError;
use crate::message::{Delivery, ExchangeName, OutboundMessage, QueueName, RoutingKey};
use crate::provider::ProviderType;
use crate::publisher::MessagePublisher;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, info, instrument};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    message_id: String,
    body: Bytes,
    content_type: String,
    timestamp: DateTime<Utc>,
    redelivered: bool,
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: RoutingKey,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    bindings: Vec<Binding>,
    published: Vec<PublishedMessage>,
    publish_log: bool,
    next_delivery_tag: u64,
    publish_failure: Option<String>,
    closed: bool,
}

/// A message as it was handed to the broker
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub message_id: String,
    pub body: Bytes,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
}

impl PublishedMessage {
    /// Decode the JSON body
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

// ============================================================================
// Broker
// ============================================================================

/// In-memory broker implementing both publisher and consumer.
///
/// Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that records every publish for [`published`](Self::published)
    pub fn with_publish_log() -> Self {
        let broker = Self::new();
        broker.lock().publish_log = true;
        broker
    }

    // A poisoned lock only means a test panicked mid-operation; the state is still usable.
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Declare a durable queue and bind it to `exchange` with `pattern`.
    ///
    /// Idempotent. Messages published before the binding exists are not routed
    /// to the queue.
    pub fn bind_queue(&self, exchange: &ExchangeName, queue: &QueueName, pattern: &RoutingKey) {
        let mut state = self.lock();
        state.exchanges.insert(exchange.as_str().to_string());
        state.queues.entry(queue.as_str().to_string()).or_default();

        let exists = state.bindings.iter().any(|b| {
            b.exchange == exchange.as_str() && b.queue == queue.as_str() && b.pattern == *pattern
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.as_str().to_string(),
                queue: queue.as_str().to_string(),
                pattern: pattern.clone(),
            });
        }
    }

    /// Whether `exchange` has been declared
    pub fn has_exchange(&self, exchange: &str) -> bool {
        self.lock().exchanges.contains(exchange)
    }

    /// Every message published so far, in publish order. Always empty unless
    /// the broker was built with [`with_publish_log`](Self::with_publish_log).
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    /// Published messages carrying `routing_key`
    pub fn published_with_key(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.lock()
            .published
            .iter()
            .filter(|m| m.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Number of messages waiting in `queue`
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.len())
    }

    /// Make every subsequent publish fail with `message`; `None` restores normal operation
    pub fn set_publish_failure(&self, message: Option<String>) {
        self.lock().publish_failure = message;
    }

    /// Close the broker. Publishes fail and consumer loops return.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn next_delivery(&self, queue: &str) -> Result<Option<Delivery>, BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        let Some(stored) = state.queues.get_mut(queue).and_then(|q| q.pop_front()) else {
            return Ok(None);
        };

        state.next_delivery_tag += 1;
        Ok(Some(Delivery {
            delivery_tag: state.next_delivery_tag,
            exchange: stored.exchange,
            routing_key: stored.routing_key,
            body: stored.body,
            content_type: Some(stored.content_type),
            timestamp: Some(stored.timestamp),
            message_id: Some(stored.message_id),
            redelivered: stored.redelivered,
        }))
    }

    fn requeue(&self, queue: &str, delivery: &Delivery) {
        let stored = StoredMessage {
            exchange: delivery.exchange.clone(),
            routing_key: delivery.routing_key.clone(),
            message_id: delivery.message_id.clone().unwrap_or_default(),
            body: delivery.body.clone(),
            content_type: delivery.content_type.clone().unwrap_or_default(),
            timestamp: delivery.timestamp.unwrap_or_else(Utc::now),
            redelivered: true,
        };
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_front(stored);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: OutboundMessage,
    ) -> Result<(), BusError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(BusError::Closed);
            }

            if let Some(reason) = &state.publish_failure {
                return Err(BusError::PublishFailed {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    message: reason.clone(),
                });
            }

            state.exchanges.insert(exchange.as_str().to_string());

            let stored = StoredMessage {
                exchange: exchange.as_str().to_string(),
                routing_key: routing_key.as_str().to_string(),
                message_id: message.message_id.as_str().to_string(),
                body: message.body,
                content_type: message.content_type,
                timestamp: message.timestamp,
                redelivered: false,
            };

            // One copy per queue, however many of its bindings match.
            let targets: HashSet<String> = state
                .bindings
                .iter()
                .filter(|b| b.exchange == exchange.as_str() && b.pattern.matches(routing_key.as_str()))
                .map(|b| b.queue.clone())
                .collect();

            for queue in &targets {
                state
                    .queues
                    .entry(queue.clone())
                    .or_default()
                    .push_back(stored.clone());
            }

            debug!(
                exchange = %exchange,
                routing_key = %routing_key,
                queues = targets.len(),
                "Message routed"
            );

            if state.publish_log {
                state.published.push(PublishedMessage {
                    exchange: stored.exchange,
                    routing_key: stored.routing_key,
                    message_id: stored.message_id,
                    body: stored.body,
                    content_type: stored.content_type,
                    timestamp: stored.timestamp,
                });
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

#[async_trait]
impl MessageConsumer for InMemoryBroker {
    #[instrument(skip(self, handlers), fields(exchange = %exchange, queue = %queue))]
    async fn consume_with_bindings(
        &self,
        exchange: &ExchangeName,
        queue: &QueueName,
        handlers: HandlerMap,
    ) -> Result<(), BusError> {
        for key in handlers.keys() {
            self.bind_queue(exchange, queue, key);
        }
        info!(bindings = handlers.len(), "In-memory consumer started");

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivery = match self.next_delivery(queue.as_str()) {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    notified.await;
                    continue;
                }
                Err(BusError::Closed) => {
                    info!("Broker closed; consumer stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            if dispatch(&handlers, &delivery).await == Disposition::Requeue {
                self.requeue(queue.as_str(), &delivery);
                // Let other tasks run between redeliveries of a failing message.
                tokio::task::yield_now().await;
            }
        }
    }
}
