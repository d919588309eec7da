//! Tests for consumer handlers.

use super::*;
use crate::directory::{DirectoryError, InMemoryCustomerDirectory};
use crate::stage::{InMemoryStageRepository, StageStoreError};
use crate::{EventId, ResourceId, TierStage, Timestamp, VerificationStatus};
use bytes::Bytes;
use std::sync::Mutex;

// ============================================================================
// Test Doubles
// ============================================================================

#[derive(Default)]
struct RecordingOpener {
    calls: Mutex<Vec<(UserId, String)>>,
    fail: bool,
}

impl RecordingOpener {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(UserId, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountOpener for RecordingOpener {
    async fn open_account(
        &self,
        user_id: &UserId,
        event: &CanonicalVerificationEvent,
    ) -> Result<(), AccountOpeningError> {
        self.calls
            .lock()
            .unwrap()
            .push((user_id.clone(), event.resource_id.to_string()));
        if self.fail {
            return Err(AccountOpeningError::Failed {
                user_id: user_id.to_string(),
                message: "ledger offline".to_string(),
            });
        }
        Ok(())
    }
}

struct UnavailableRepository;

#[async_trait]
impl StageRepository for UnavailableRepository {
    async fn upsert(&self, _record: &StageRecord) -> Result<UpsertOutcome, StageStoreError> {
        Err(StageStoreError::Unavailable {
            message: "connection refused".to_string(),
        })
    }

    async fn records_for_user(&self, _user_id: &UserId) -> Result<Vec<StageRecord>, StageStoreError> {
        Ok(Vec::new())
    }
}

struct UnavailableDirectory;

#[async_trait]
impl CustomerDirectory for UnavailableDirectory {
    async fn user_for_resource(
        &self,
        _resource_id: &ResourceId,
    ) -> Result<Option<UserId>, DirectoryError> {
        Err(DirectoryError::Unavailable {
            message: "timeout".to_string(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

const RESOURCE: &str = "1700-anc_ind_cst";

fn user() -> UserId {
    UserId::new("user-42").unwrap()
}

fn directory() -> Arc<InMemoryCustomerDirectory> {
    Arc::new(
        InMemoryCustomerDirectory::new()
            .with_customer(ResourceId::new(RESOURCE).unwrap(), user()),
    )
}

fn event(stage: TierStage, status: VerificationStatus, at: &str) -> CanonicalVerificationEvent {
    CanonicalVerificationEvent {
        event_id: EventId::new(),
        event_type: "customer.identification.approved".to_string(),
        resource_id: ResourceId::new(RESOURCE).unwrap(),
        tier_stage: stage,
        status,
        reason: None,
        occurred_at: Timestamp::from_rfc3339(at).unwrap(),
    }
}

fn delivery(routing_key: &str, body: Bytes) -> Delivery {
    Delivery {
        delivery_tag: 1,
        exchange: "customer_events".to_string(),
        routing_key: routing_key.to_string(),
        body,
        content_type: Some("application/json".to_string()),
        timestamp: None,
        message_id: None,
        redelivered: false,
    }
}

fn delivery_for(routing_key: &str, event: &CanonicalVerificationEvent) -> Delivery {
    delivery(routing_key, Bytes::from(serde_json::to_vec(event).unwrap()))
}

// ============================================================================
// StageUpdateHandler
// ============================================================================

#[tokio::test]
async fn test_verified_event_records_stage_and_opens_account() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let opener = Arc::new(RecordingOpener::default());
    let handler = StageUpdateHandler::new(repo.clone(), directory(), opener.clone());
    let evt = event(TierStage::Tier2, VerificationStatus::Approved, "2024-03-01T10:00:00Z");

    let ack = handler
        .handle(&delivery_for(ROUTING_KEY_VERIFIED, &evt))
        .await;

    assert!(ack);
    let rows = repo.records_for_user(&user()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].stage, TierStage::Tier2);
    assert_eq!(rows[0].status, VerificationStatus::Approved);
    assert_eq!(rows[0].updated_at, evt.occurred_at);
    assert_eq!(opener.calls(), vec![(user(), RESOURCE.to_string())]);
}

#[tokio::test]
async fn test_tier_status_event_does_not_open_account() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let opener = Arc::new(RecordingOpener::default());
    let handler = StageUpdateHandler::new(repo.clone(), directory(), opener.clone());
    let evt = event(TierStage::Tier3, VerificationStatus::Rejected, "2024-03-01T10:00:00Z");

    assert!(handler.handle(&delivery_for(ROUTING_KEY_TIER_STATUS, &evt)).await);

    let resolved = repo.current_stage(&user()).await.unwrap();
    assert_eq!(resolved.stage, TierStage::Tier3);
    assert!(opener.calls().is_empty());
}

#[tokio::test]
async fn test_undecodable_body_is_acknowledged() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let handler = StageUpdateHandler::new(
        repo.clone(),
        directory(),
        Arc::new(RecordingOpener::default()),
    );

    let ack = handler
        .handle(&delivery(ROUTING_KEY_TIER_STATUS, Bytes::from_static(b"{not json")))
        .await;

    assert!(ack);
    assert!(repo.records_for_user(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_event_without_stage_is_acknowledged_without_write() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let handler = StageUpdateHandler::new(
        repo.clone(),
        directory(),
        Arc::new(RecordingOpener::default()),
    );
    let evt = event(TierStage::Unknown, VerificationStatus::Error, "2024-03-01T10:00:00Z");

    assert!(handler.handle(&delivery_for(ROUTING_KEY_TIER_STATUS, &evt)).await);
    assert!(repo.records_for_user(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_customer_is_acknowledged() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let opener = Arc::new(RecordingOpener::default());
    let handler = StageUpdateHandler::new(
        repo.clone(),
        Arc::new(InMemoryCustomerDirectory::new()),
        opener.clone(),
    );
    let evt = event(TierStage::Tier1, VerificationStatus::Approved, "2024-03-01T10:00:00Z");

    assert!(handler.handle(&delivery_for(ROUTING_KEY_VERIFIED, &evt)).await);
    assert!(repo.records_for_user(&user()).await.unwrap().is_empty());
    assert!(opener.calls().is_empty());
}

#[tokio::test]
async fn test_directory_failure_requeues() {
    let handler = StageUpdateHandler::new(
        Arc::new(InMemoryStageRepository::new()),
        Arc::new(UnavailableDirectory),
        Arc::new(RecordingOpener::default()),
    );
    let evt = event(TierStage::Tier1, VerificationStatus::Approved, "2024-03-01T10:00:00Z");

    assert!(!handler.handle(&delivery_for(ROUTING_KEY_VERIFIED, &evt)).await);
}

#[tokio::test]
async fn test_store_failure_requeues_and_skips_account_opening() {
    let opener = Arc::new(RecordingOpener::default());
    let handler = StageUpdateHandler::new(
        Arc::new(UnavailableRepository),
        directory(),
        opener.clone(),
    );
    let evt = event(TierStage::Tier2, VerificationStatus::Approved, "2024-03-01T10:00:00Z");

    assert!(!handler.handle(&delivery_for(ROUTING_KEY_VERIFIED, &evt)).await);
    assert!(opener.calls().is_empty());
}

#[tokio::test]
async fn test_account_opening_failure_requeues() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let handler = StageUpdateHandler::new(
        repo.clone(),
        directory(),
        Arc::new(RecordingOpener::failing()),
    );
    let evt = event(TierStage::Tier2, VerificationStatus::Approved, "2024-03-01T10:00:00Z");

    assert!(!handler.handle(&delivery_for(ROUTING_KEY_VERIFIED, &evt)).await);
    // The stage write itself stuck.
    assert_eq!(repo.records_for_user(&user()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_redelivered_verified_event_retries_account_opening() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let opener = Arc::new(RecordingOpener::default());
    let handler = StageUpdateHandler::new(repo.clone(), directory(), opener.clone());
    let evt = event(TierStage::Tier2, VerificationStatus::Approved, "2024-03-01T10:00:00Z");
    let message = delivery_for(ROUTING_KEY_VERIFIED, &evt);

    assert!(handler.handle(&message).await);
    assert!(handler.handle(&message).await);

    assert_eq!(repo.records_for_user(&user()).await.unwrap().len(), 1);
    assert_eq!(opener.calls().len(), 2);
}

#[tokio::test]
async fn test_out_of_order_events_keep_newest_status() {
    let repo = Arc::new(InMemoryStageRepository::new());
    let handler = StageUpdateHandler::new(
        repo.clone(),
        directory(),
        Arc::new(RecordingOpener::default()),
    );
    let newer = event(TierStage::Tier2, VerificationStatus::Approved, "2024-03-01T10:05:00Z");
    let older = event(TierStage::Tier2, VerificationStatus::ManualReview, "2024-03-01T10:00:00Z");

    assert!(handler.handle(&delivery_for(ROUTING_KEY_VERIFIED, &newer)).await);
    assert!(handler.handle(&delivery_for(ROUTING_KEY_TIER_STATUS, &older)).await);

    let rows = repo.records_for_user(&user()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, VerificationStatus::Approved);
}

#[test]
fn test_handler_map_binds_both_routing_keys() {
    let handler = StageUpdateHandler::new(
        Arc::new(InMemoryStageRepository::new()),
        directory(),
        Arc::new(LoggingAccountOpener),
    );

    let map = handler.into_handler_map().unwrap();

    assert_eq!(map.len(), 2);
    assert!(map.contains_key(&RoutingKey::new(ROUTING_KEY_VERIFIED).unwrap()));
    assert!(map.contains_key(&RoutingKey::new(ROUTING_KEY_TIER_STATUS).unwrap()));
}
