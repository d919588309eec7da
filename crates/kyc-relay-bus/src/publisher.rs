//! Publisher trait and the no-op publisher.

use crate::error::BusError;
use crate::message::{ExchangeName, OutboundMessage, RoutingKey};
use crate::provider::ProviderType;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;

/// Interface for publishing messages to a topic exchange
///
/// Implementations declare the exchange lazily (durable, topic) on first use
/// and must be safe to share across request handlers.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one message to `exchange` with `routing_key`
    async fn publish(
        &self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: OutboundMessage,
    ) -> Result<(), BusError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Serialize `body` to JSON and publish it
pub async fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn MessagePublisher,
    exchange: &ExchangeName,
    routing_key: &RoutingKey,
    body: &T,
) -> Result<(), BusError> {
    let message = OutboundMessage::json(body)?;
    debug!(
        exchange = %exchange,
        routing_key = %routing_key,
        message_id = %message.message_id,
        size_bytes = message.body.len(),
        "Publishing message"
    );
    publisher.publish(exchange, routing_key, message).await
}

/// Publisher used when the bus is intentionally unavailable.
///
/// Every publish is logged at `WARN` and reported as successful, so the
/// webhook path degrades instead of failing. Events published through this
/// type are lost.
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

impl NoopPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessagePublisher for NoopPublisher {
    async fn publish(
        &self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: OutboundMessage,
    ) -> Result<(), BusError> {
        warn!(
            exchange = %exchange,
            routing_key = %routing_key,
            message_id = %message.message_id,
            "Message bus disabled; dropping message"
        );
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Noop
    }
}
