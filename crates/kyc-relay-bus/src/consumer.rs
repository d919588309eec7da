//! Consumer traits and delivery dispatch.
//!
//! A consumer binds one or more routing keys to handlers on a single durable
//! queue. Every delivery is routed to the handler registered for its routing
//! key and acknowledged according to the handler's verdict:
//!
//! | Handler result | Broker action |
//! |----------------|---------------|
//! | no handler     | ack (message dropped, logged) |
//! | `true`         | ack |
//! | `false`        | nack with requeue |
//!
//! There is no redelivery cap; a handler that keeps returning `false` keeps
//! the message cycling through the queue.

use crate::error::BusError;
use crate::message::{Delivery, ExchangeName, QueueName, RoutingKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Handler invoked for each delivery on a bound routing key.
///
/// Handlers must be idempotent and tolerate out-of-order delivery: messages
/// are delivered at least once and ordering holds only within one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a delivery. `true` acknowledges it, `false` requeues it.
    async fn handle(&self, delivery: &Delivery) -> bool;
}

/// Routing key → handler bindings for one subscription
pub type HandlerMap = HashMap<RoutingKey, Arc<dyn MessageHandler>>;

/// What the consumer loop should tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded
    Ack,
    /// No handler bound for the routing key; acknowledged so it does not accumulate
    Drop,
    /// Handler failed; negative-acknowledge with requeue
    Requeue,
}

impl Disposition {
    /// Whether the broker should receive a positive acknowledgement
    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack | Self::Drop)
    }
}

/// Find the handler for a concrete routing key.
///
/// Exact bindings win; otherwise wildcard bindings are tried in lexical order.
pub fn find_handler<'a>(
    handlers: &'a HandlerMap,
    routing_key: &str,
) -> Option<&'a Arc<dyn MessageHandler>> {
    if let Some(handler) = handlers
        .iter()
        .find(|(key, _)| !key.is_pattern() && key.as_str() == routing_key)
        .map(|(_, handler)| handler)
    {
        return Some(handler);
    }

    let mut patterns: Vec<(&RoutingKey, &Arc<dyn MessageHandler>)> = handlers
        .iter()
        .filter(|(key, _)| key.is_pattern() && key.matches(routing_key))
        .collect();
    patterns.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    patterns.first().map(|(_, handler)| *handler)
}

/// Route one delivery to its handler and decide how to acknowledge it
pub async fn dispatch(handlers: &HandlerMap, delivery: &Delivery) -> Disposition {
    let Some(handler) = find_handler(handlers, &delivery.routing_key) else {
        warn!(
            routing_key = %delivery.routing_key,
            delivery_tag = delivery.delivery_tag,
            "No handler bound for routing key; acknowledging and dropping message"
        );
        return Disposition::Drop;
    };

    if delivery.redelivered {
        warn!(
            routing_key = %delivery.routing_key,
            delivery_tag = delivery.delivery_tag,
            message_id = ?delivery.message_id,
            "Processing redelivered message"
        );
    }

    if handler.handle(delivery).await {
        debug!(
            routing_key = %delivery.routing_key,
            delivery_tag = delivery.delivery_tag,
            "Handler succeeded; acknowledging"
        );
        Disposition::Ack
    } else {
        warn!(
            routing_key = %delivery.routing_key,
            delivery_tag = delivery.delivery_tag,
            "Handler failed; requeueing message"
        );
        Disposition::Requeue
    }
}

/// Interface for subscribing handlers to a durable queue
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Declare `exchange` (topic, durable) and `queue` (durable), bind every
    /// routing key in `handlers`, then process deliveries sequentially until
    /// the subscription ends.
    ///
    /// Returns `Ok(())` when the broker is closed cleanly and an error when the
    /// setup fails or the connection is lost.
    async fn consume_with_bindings(
        &self,
        exchange: &ExchangeName,
        queue: &QueueName,
        handlers: HandlerMap,
    ) -> Result<(), BusError>;
}
