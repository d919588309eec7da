//! Tests for the in-memory stage repository.

use super::*;
use crate::{TierStage, Timestamp, VerificationStatus};

fn user() -> UserId {
    UserId::new("user-7").unwrap()
}

fn at(offset_seconds: i64) -> Timestamp {
    Timestamp::from_rfc3339("2024-02-01T00:00:00Z")
        .unwrap()
        .add_seconds(offset_seconds)
}

fn record(stage: TierStage, status: VerificationStatus, offset_seconds: i64) -> StageRecord {
    StageRecord::new(user(), stage, status, at(offset_seconds))
}

#[tokio::test]
async fn test_first_write_is_applied() {
    let repo = InMemoryStageRepository::new();

    let outcome = repo
        .upsert(&record(TierStage::Tier2, VerificationStatus::Pending, 0))
        .await
        .unwrap();

    assert_eq!(outcome, UpsertOutcome::Applied);
    assert_eq!(repo.records_for_user(&user()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_newer_write_replaces_row() {
    let repo = InMemoryStageRepository::new();
    repo.upsert(&record(TierStage::Tier2, VerificationStatus::Pending, 0))
        .await
        .unwrap();

    let outcome = repo
        .upsert(&record(TierStage::Tier2, VerificationStatus::Approved, 5))
        .await
        .unwrap();

    assert_eq!(outcome, UpsertOutcome::Applied);
    let rows = repo.records_for_user(&user()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, VerificationStatus::Approved);
    assert_eq!(rows[0].updated_at, at(5));
}

#[tokio::test]
async fn test_duplicate_and_older_writes_are_stale() {
    let repo = InMemoryStageRepository::new();
    repo.upsert(&record(TierStage::Tier2, VerificationStatus::Rejected, 5))
        .await
        .unwrap();

    let duplicate = repo
        .upsert(&record(TierStage::Tier2, VerificationStatus::Rejected, 5))
        .await
        .unwrap();
    let older = repo
        .upsert(&record(TierStage::Tier2, VerificationStatus::Pending, 1))
        .await
        .unwrap();

    assert_eq!(duplicate, UpsertOutcome::Stale);
    assert_eq!(older, UpsertOutcome::Stale);
    let rows = repo.records_for_user(&user()).await.unwrap();
    assert_eq!(rows[0].status, VerificationStatus::Rejected);
}

#[tokio::test]
async fn test_stages_are_independent_rows() {
    let repo = InMemoryStageRepository::new();
    repo.upsert(&record(TierStage::Tier2, VerificationStatus::Processing, 0))
        .await
        .unwrap();
    repo.upsert(&record(TierStage::Tier3, VerificationStatus::Pending, 10))
        .await
        .unwrap();

    let rows = repo.records_for_user(&user()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].stage, TierStage::Tier2);
    assert_eq!(rows[1].stage, TierStage::Tier3);

    let resolved = repo.current_stage(&user()).await.unwrap();
    assert_eq!(resolved.stage, TierStage::Tier3);
    assert_eq!(resolved.records.len(), 2);
}

#[tokio::test]
async fn test_unknown_stage_rejected() {
    let repo = InMemoryStageRepository::new();

    let result = repo
        .upsert(&record(TierStage::Unknown, VerificationStatus::Error, 0))
        .await;

    assert!(matches!(result, Err(StageStoreError::UnknownStage)));
}

#[tokio::test]
async fn test_unknown_user_has_no_records() {
    let repo = InMemoryStageRepository::new();

    let resolved = repo.current_stage(&user()).await.unwrap();

    assert_eq!(resolved.stage, TierStage::Unknown);
    assert!(resolved.records.is_empty());
}
