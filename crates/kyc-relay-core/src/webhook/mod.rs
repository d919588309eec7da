//! # Webhook Processing Module
//!
//! Authenticates, parses and classifies provider verification webhooks, then
//! hands canonical events to an [`EventRouter`].
//!
//! Processing order for one request:
//!
//! 1. Signature check over the raw body bytes
//! 2. JSON parse into [`WebhookPayload`]
//! 3. Classification; unhandled event names stop here
//! 4. Routing onto the message bus
//!
//! Nothing on this side writes stage records.

use crate::routing::{EventRouter, RoutingError};
use crate::signature::{self, SignatureCheck, SignatureRejection, WebhookSecret};
use crate::{CorrelationId, ErrorCategory, Timestamp};
use bytes::Bytes;
use kyc_relay_bus::RoutingKey;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub mod classifier;
pub mod payload;

pub use classifier::{
    classify, classify_at, extract_reason, extract_stage, CanonicalVerificationEvent,
    ClassifiedEvent, EventSuffix,
};
pub use payload::{PayloadError, WebhookPayload};

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// ============================================================================
// Core Types
// ============================================================================

/// Raw webhook request as received over HTTP
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Exact body bytes; the signature covers these
    pub body: Bytes,
    pub signature: Option<String>,
    pub correlation_id: CorrelationId,
    pub received_at: Timestamp,
}

impl WebhookRequest {
    /// Create new webhook request
    pub fn new(body: Bytes, signature: Option<String>) -> Self {
        Self {
            body,
            signature,
            correlation_id: CorrelationId::new(),
            received_at: Timestamp::now(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Result of processing an accepted webhook
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// Event classified and published
    Published {
        event: CanonicalVerificationEvent,
        routing_key: RoutingKey,
    },
    /// Event name outside the handled set; nothing published
    Ignored { event_type: String },
}

/// Errors that reject a webhook
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Signature validation failed: {}", .0.as_str())]
    InvalidSignature(SignatureRejection),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    #[error("Event delivery failed: {0}")]
    Publish(#[from] RoutingError),
}

impl WebhookError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidSignature(_) => false,
            Self::MalformedPayload(_) => false,
            Self::Publish(e) => e.is_transient(),
        }
    }

    /// Get error category for monitoring
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSignature(_) => ErrorCategory::Security,
            Self::MalformedPayload(_) => ErrorCategory::Permanent,
            Self::Publish(_) => ErrorCategory::Transient,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }
}

// ============================================================================
// Processor
// ============================================================================

/// Webhook processor for provider verification callbacks
pub struct VerificationWebhookProcessor {
    secret: WebhookSecret,
    router: Arc<dyn EventRouter>,
}

impl VerificationWebhookProcessor {
    /// Create new processor.
    ///
    /// An empty `secret` disables signature checks; every request is then
    /// accepted with a warning.
    pub fn new(secret: WebhookSecret, router: Arc<dyn EventRouter>) -> Self {
        if secret.is_empty() {
            warn!("Webhook signing secret is empty; signature validation is disabled");
        }
        Self { secret, router }
    }

    /// Process one webhook request end to end
    #[instrument(
        skip(self, request),
        fields(correlation_id = %request.correlation_id, body_size = request.body.len())
    )]
    pub async fn process(&self, request: WebhookRequest) -> Result<ProcessingOutcome, WebhookError> {
        // 1. Signature over the exact bytes received
        let check = signature::check(&self.secret, &request.body, request.signature.as_deref());
        if let SignatureCheck::Rejected(reason) = check {
            warn!(reason = reason.as_str(), "Rejecting webhook with invalid signature");
            return Err(WebhookError::InvalidSignature(reason));
        }

        // 2. Parse
        let payload = WebhookPayload::parse(request.body.clone())?;

        // 3. Classify
        let event = match classifier::classify_at(&payload, request.received_at) {
            ClassifiedEvent::Verification(event) => event,
            ClassifiedEvent::Unhandled { event_type, raw } => {
                info!(
                    event_type = %event_type,
                    body_size = raw.len(),
                    "Ignoring unhandled webhook event"
                );
                return Ok(ProcessingOutcome::Ignored { event_type });
            }
        };

        // 4. Route
        let routing_key = self.router.route(&event).await?;

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            resource_id = %event.resource_id,
            routing_key = %routing_key,
            "Successfully processed webhook"
        );

        Ok(ProcessingOutcome::Published { event, routing_key })
    }
}
