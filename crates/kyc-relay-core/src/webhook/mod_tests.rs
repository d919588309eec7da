//! Tests for the webhook processor.

use super::*;
use crate::routing::BusEventRouter;
use crate::{TierStage, VerificationStatus};
use kyc_relay_bus::{ExchangeName, InMemoryBroker};
use serde_json::json;

const SECRET: &str = "whsec_processor";

fn body(event: &str, attributes: serde_json::Value) -> Bytes {
    Bytes::from(
        serde_json::to_vec(&json!({
            "event": event,
            "data": { "id": "X-anc_ind_cst", "type": "individualCustomer", "attributes": attributes }
        }))
        .unwrap(),
    )
}

fn signed(body: Bytes) -> WebhookRequest {
    let header = signature::sign_sha256(&WebhookSecret::new(SECRET), &body).unwrap();
    WebhookRequest::new(body, Some(header))
}

fn processor(broker: &InMemoryBroker) -> VerificationWebhookProcessor {
    let router = BusEventRouter::new(
        Arc::new(broker.clone()),
        ExchangeName::new("customer_events").unwrap(),
    );
    VerificationWebhookProcessor::new(WebhookSecret::new(SECRET), Arc::new(router))
}

#[tokio::test]
async fn test_approved_webhook_published_on_verified_key() {
    let broker = InMemoryBroker::with_publish_log();

    let outcome = processor(&broker)
        .process(signed(body(
            "customer.identification.approved",
            json!({ "level": "TIER_2" }),
        )))
        .await
        .unwrap();

    match outcome {
        ProcessingOutcome::Published { event, routing_key } => {
            assert_eq!(routing_key.as_str(), "customer.verified");
            assert_eq!(event.status, VerificationStatus::Approved);
            assert_eq!(event.tier_stage, TierStage::Tier2);
        }
        other => panic!("expected published outcome, got {:?}", other),
    }
    assert_eq!(broker.published_with_key("customer.verified").len(), 1);
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
async fn test_invalid_signature_publishes_nothing() {
    let broker = InMemoryBroker::with_publish_log();
    let request = WebhookRequest::new(
        body("customer.identification.approved", json!({})),
        Some("sha256=00".to_string()),
    );

    let result = processor(&broker).process(request).await;

    assert!(matches!(
        result,
        Err(WebhookError::InvalidSignature(SignatureRejection::Mismatch(_)))
    ));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_tampered_body_rejected() {
    let broker = InMemoryBroker::with_publish_log();
    let mut request = signed(body("customer.identification.approved", json!({})));
    request.body = body("customer.identification.approved", json!({ "level": "tier3" }));

    let result = processor(&broker).process(request).await;

    assert!(matches!(result, Err(WebhookError::InvalidSignature(_))));
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let broker = InMemoryBroker::with_publish_log();
    let request = WebhookRequest::new(body("customer.identification.approved", json!({})), None);

    let result = processor(&broker).process(request).await;

    assert!(matches!(
        result,
        Err(WebhookError::InvalidSignature(SignatureRejection::MissingHeader))
    ));
}

#[tokio::test]
async fn test_malformed_json_is_rejected_after_signature_check() {
    let broker = InMemoryBroker::with_publish_log();

    let result = processor(&broker)
        .process(signed(Bytes::from_static(b"{not json")))
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, WebhookError::MalformedPayload(_)));
    assert!(!error.is_transient());
    assert_eq!(error.error_category(), ErrorCategory::Permanent);
}

#[tokio::test]
async fn test_unhandled_event_is_ignored() {
    let broker = InMemoryBroker::with_publish_log();

    let outcome = processor(&broker)
        .process(signed(body("customer.created", json!({}))))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        ProcessingOutcome::Ignored { ref event_type } if event_type == "customer.created"
    ));
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn test_publish_failure_is_transient_error() {
    let broker = InMemoryBroker::with_publish_log();
    broker.set_publish_failure(Some("connection reset".to_string()));

    let result = processor(&broker)
        .process(signed(body("customer.identification.rejected", json!({}))))
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, WebhookError::Publish(_)));
    assert!(error.should_retry());
}

#[tokio::test]
async fn test_empty_secret_accepts_unsigned_webhook() {
    let broker = InMemoryBroker::with_publish_log();
    let router = BusEventRouter::new(
        Arc::new(broker.clone()),
        ExchangeName::new("customer_events").unwrap(),
    );
    let processor = VerificationWebhookProcessor::new(WebhookSecret::default(), Arc::new(router));

    let outcome = processor
        .process(WebhookRequest::new(
            body("customer.identification.error", json!({})),
            None,
        ))
        .await
        .unwrap();

    assert!(matches!(outcome, ProcessingOutcome::Published { .. }));
    assert_eq!(broker.published_with_key("customer.tier.status").len(), 1);
}

#[tokio::test]
async fn test_occurred_at_is_receive_time() {
    let broker = InMemoryBroker::with_publish_log();
    let mut request = signed(body("customer.identification.approved", json!({})));
    request.received_at = Timestamp::from_rfc3339("2024-06-01T08:30:00Z").unwrap();

    let outcome = processor(&broker).process(request).await.unwrap();

    match outcome {
        ProcessingOutcome::Published { event, .. } => {
            assert_eq!(event.occurred_at.to_rfc3339(), "2024-06-01T08:30:00+00:00");
        }
        other => panic!("expected published outcome, got {:?}", other),
    }
}
