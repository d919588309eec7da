//! Tests for event routing.

use super::*;
use crate::{EventId, ResourceId, TierStage, Timestamp};
use kyc_relay_bus::{InMemoryBroker, QueueName};

fn event(status: VerificationStatus, reason: Option<&str>) -> CanonicalVerificationEvent {
    CanonicalVerificationEvent {
        event_id: EventId::new(),
        event_type: format!("customer.identification.{}", status),
        resource_id: ResourceId::new("X-anc_ind_cst").unwrap(),
        tier_stage: TierStage::Tier2,
        status,
        reason: reason.map(str::to_string),
        occurred_at: Timestamp::now(),
    }
}

fn router(broker: &InMemoryBroker) -> BusEventRouter {
    BusEventRouter::new(
        Arc::new(broker.clone()),
        ExchangeName::new(DEFAULT_EXCHANGE).unwrap(),
    )
}

#[test]
fn test_routing_table() {
    assert_eq!(routing_key_for(VerificationStatus::Approved), "customer.verified");
    assert_eq!(routing_key_for(VerificationStatus::Rejected), "customer.tier.status");
    assert_eq!(routing_key_for(VerificationStatus::ManualReview), "customer.tier.status");
    assert_eq!(routing_key_for(VerificationStatus::Error), "customer.tier.status");
}

#[tokio::test]
async fn test_approved_event_published_once_on_verified_key() {
    let broker = InMemoryBroker::with_publish_log();

    let key = router(&broker)
        .route(&event(VerificationStatus::Approved, None))
        .await
        .unwrap();

    assert_eq!(key.as_str(), ROUTING_KEY_VERIFIED);
    let published = broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "customer_events");
    assert_eq!(published[0].routing_key, "customer.verified");

    let body: serde_json::Value = published[0].json().unwrap();
    assert_eq!(body["resource_id"], "X-anc_ind_cst");
    assert_eq!(body["status"], "approved");
}

#[tokio::test]
async fn test_rejected_event_carries_reason() {
    let broker = InMemoryBroker::with_publish_log();

    router(&broker)
        .route(&event(VerificationStatus::Rejected, Some("Document expired")))
        .await
        .unwrap();

    let published = broker.published_with_key(ROUTING_KEY_TIER_STATUS);
    assert_eq!(published.len(), 1);
    let body: serde_json::Value = published[0].json().unwrap();
    assert_eq!(body["reason"], "Document expired");
    assert_eq!(body["tier_stage"], "tier2");
}

#[tokio::test]
async fn test_published_event_reaches_bound_queue() {
    let broker = InMemoryBroker::with_publish_log();
    broker.bind_queue(
        &ExchangeName::new(DEFAULT_EXCHANGE).unwrap(),
        &QueueName::new("stage-updates").unwrap(),
        &RoutingKey::new("customer.#").unwrap(),
    );

    router(&broker)
        .route(&event(VerificationStatus::ManualReview, None))
        .await
        .unwrap();

    assert_eq!(broker.queue_depth("stage-updates"), 1);
}

#[tokio::test]
async fn test_publish_failure_surfaces_as_routing_error() {
    let broker = InMemoryBroker::with_publish_log();
    broker.set_publish_failure(Some("channel closed".to_string()));

    let result = router(&broker)
        .route(&event(VerificationStatus::Approved, None))
        .await;

    match result {
        Err(RoutingError::Publish { routing_key, source, .. }) => {
            assert_eq!(routing_key, "customer.verified");
            assert!(matches!(source, BusError::PublishFailed { .. }));
        }
        other => panic!("expected publish error, got {:?}", other),
    }
}
