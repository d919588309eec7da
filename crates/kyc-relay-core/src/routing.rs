//! # Event Routing
//!
//! Publishes canonical verification events onto the topic exchange.
//!
//! | Status | Routing key |
//! |--------|-------------|
//! | `approved` | `customer.verified` |
//! | `rejected`, `manual_review`, `error` (and any other) | `customer.tier.status` |
//!
//! Each event is published exactly once, to exactly one routing key.

use crate::webhook::CanonicalVerificationEvent;
use crate::VerificationStatus;
use async_trait::async_trait;
use kyc_relay_bus::{publish_json, BusError, ExchangeName, MessagePublisher, RoutingKey};
use std::sync::Arc;
use tracing::{error, info, instrument};

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;

/// Routing key for approved verifications
pub const ROUTING_KEY_VERIFIED: &str = "customer.verified";

/// Routing key for every other verification status change
pub const ROUTING_KEY_TIER_STATUS: &str = "customer.tier.status";

/// Default topic exchange for customer events
pub const DEFAULT_EXCHANGE: &str = "customer_events";

/// Routing key an event with `status` is published under
pub fn routing_key_for(status: VerificationStatus) -> &'static str {
    match status {
        VerificationStatus::Approved => ROUTING_KEY_VERIFIED,
        _ => ROUTING_KEY_TIER_STATUS,
    }
}

/// Errors raised while routing an event
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Failed to publish event {event_id} with key '{routing_key}': {source}")]
    Publish {
        event_id: String,
        routing_key: String,
        #[source]
        source: BusError,
    },

    #[error("Invalid routing configuration: {0}")]
    Configuration(#[from] kyc_relay_bus::ValidationError),
}

impl RoutingError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Publish { source, .. } => source.is_transient(),
            Self::Configuration(_) => false,
        }
    }
}

/// Interface for delivering canonical events downstream
#[async_trait]
pub trait EventRouter: Send + Sync {
    /// Publish `event` and return the routing key it was published under
    async fn route(&self, event: &CanonicalVerificationEvent) -> Result<RoutingKey, RoutingError>;
}

/// Router publishing JSON events to a topic exchange
pub struct BusEventRouter {
    publisher: Arc<dyn MessagePublisher>,
    exchange: ExchangeName,
}

impl BusEventRouter {
    pub fn new(publisher: Arc<dyn MessagePublisher>, exchange: ExchangeName) -> Self {
        Self {
            publisher,
            exchange,
        }
    }

    pub fn exchange(&self) -> &ExchangeName {
        &self.exchange
    }
}

#[async_trait]
impl EventRouter for BusEventRouter {
    #[instrument(skip(self, event), fields(event_id = %event.event_id, status = %event.status))]
    async fn route(&self, event: &CanonicalVerificationEvent) -> Result<RoutingKey, RoutingError> {
        let routing_key = RoutingKey::new(routing_key_for(event.status))?;

        match publish_json(self.publisher.as_ref(), &self.exchange, &routing_key, event).await {
            Ok(()) => {
                info!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    resource_id = %event.resource_id,
                    tier_stage = %event.tier_stage,
                    "Published verification event"
                );
                Ok(routing_key)
            }
            Err(e) => {
                error!(
                    exchange = %self.exchange,
                    routing_key = %routing_key,
                    error = %e,
                    "Failed to publish verification event"
                );
                Err(RoutingError::Publish {
                    event_id: event.event_id.to_string(),
                    routing_key: routing_key.to_string(),
                    source: e,
                })
            }
        }
    }
}
