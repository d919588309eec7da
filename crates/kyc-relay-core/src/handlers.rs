//! # Consumer Handlers
//!
//! Bus handlers that turn canonical verification events into stage records.
//!
//! The handler verdict follows the bus contract: `true` acknowledges the
//! delivery, `false` requeues it. Messages that can never succeed (undecodable
//! bodies, events without a tier, customers we do not know) are acknowledged
//! and logged instead of cycling through the queue.

use crate::directory::CustomerDirectory;
use crate::routing::{ROUTING_KEY_TIER_STATUS, ROUTING_KEY_VERIFIED};
use crate::stage::{StageRecord, StageRepository, UpsertOutcome};
use crate::webhook::CanonicalVerificationEvent;
use crate::UserId;
use async_trait::async_trait;
use kyc_relay_bus::{Delivery, HandlerMap, MessageHandler, RoutingKey};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;

// ============================================================================
// Account Opening
// ============================================================================

/// Errors raised while opening accounts for verified customers
#[derive(Debug, thiserror::Error)]
pub enum AccountOpeningError {
    #[error("Account opening failed for user {user_id}: {message}")]
    Failed { user_id: String, message: String },
}

/// Opens accounts once a customer is verified.
///
/// May be called more than once for the same event; implementations must be
/// idempotent.
#[async_trait]
pub trait AccountOpener: Send + Sync {
    async fn open_account(
        &self,
        user_id: &UserId,
        event: &CanonicalVerificationEvent,
    ) -> Result<(), AccountOpeningError>;
}

/// Account opener that only records the request in the log
#[derive(Debug, Clone, Default)]
pub struct LoggingAccountOpener;

#[async_trait]
impl AccountOpener for LoggingAccountOpener {
    async fn open_account(
        &self,
        user_id: &UserId,
        event: &CanonicalVerificationEvent,
    ) -> Result<(), AccountOpeningError> {
        info!(
            user_id = %user_id,
            resource_id = %event.resource_id,
            tier_stage = %event.tier_stage.as_str(),
            "Account opening requested"
        );
        Ok(())
    }
}

// ============================================================================
// Stage Update Handler
// ============================================================================

/// Writes a stage record for every canonical event delivered to it
pub struct StageUpdateHandler {
    repository: Arc<dyn StageRepository>,
    directory: Arc<dyn CustomerDirectory>,
    opener: Arc<dyn AccountOpener>,
}

impl StageUpdateHandler {
    pub fn new(
        repository: Arc<dyn StageRepository>,
        directory: Arc<dyn CustomerDirectory>,
        opener: Arc<dyn AccountOpener>,
    ) -> Self {
        Self {
            repository,
            directory,
            opener,
        }
    }

    /// Bind this handler to both verification routing keys
    pub fn into_handler_map(self) -> Result<HandlerMap, kyc_relay_bus::ValidationError> {
        let handler: Arc<dyn MessageHandler> = Arc::new(self);
        let mut handlers = HandlerMap::new();
        handlers.insert(RoutingKey::new(ROUTING_KEY_VERIFIED)?, handler.clone());
        handlers.insert(RoutingKey::new(ROUTING_KEY_TIER_STATUS)?, handler);
        Ok(handlers)
    }
}

#[async_trait]
impl MessageHandler for StageUpdateHandler {
    #[instrument(skip(self, delivery), fields(routing_key = %delivery.routing_key, delivery_tag = delivery.delivery_tag))]
    async fn handle(&self, delivery: &Delivery) -> bool {
        let event: CanonicalVerificationEvent = match delivery.json() {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Discarding undecodable verification event");
                return true;
            }
        };

        if !event.tier_stage.is_known() {
            info!(
                event_id = %event.event_id,
                resource_id = %event.resource_id,
                "Event carries no tier stage, nothing to record"
            );
            return true;
        }

        let user_id = match self.directory.user_for_resource(&event.resource_id).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                warn!(
                    event_id = %event.event_id,
                    resource_id = %event.resource_id,
                    "No user found for resource, dropping event"
                );
                return true;
            }
            Err(e) => {
                warn!(error = %e, "Customer lookup failed, requeueing");
                return false;
            }
        };

        let record = StageRecord::new(
            user_id.clone(),
            event.tier_stage,
            event.status,
            event.occurred_at,
        );

        match self.repository.upsert(&record).await {
            Ok(UpsertOutcome::Applied) => {
                info!(
                    user_id = %user_id,
                    tier_stage = %record.stage.as_str(),
                    status = %record.status.as_str(),
                    "Stage record updated"
                );
            }
            Ok(UpsertOutcome::Stale) => {
                debug!(
                    user_id = %user_id,
                    tier_stage = %record.stage.as_str(),
                    "Stage record unchanged, event is a duplicate or out of order"
                );
            }
            Err(e) => {
                error!(error = %e, user_id = %user_id, "Failed to write stage record");
                return false;
            }
        }

        if delivery.routing_key == ROUTING_KEY_VERIFIED {
            if let Err(e) = self.opener.open_account(&user_id, &event).await {
                error!(error = %e, "Account opening failed, requeueing");
                return false;
            }
        }

        true
    }
}
