//! # Stage Records
//!
//! Per-user, per-tier verification state written by the consumer side of the
//! pipeline, and the resolution of a user's single current stage.
//!
//! Writes are single-row upserts keyed by `(user_id, stage)` and only apply
//! when the incoming `updated_at` is strictly newer than the stored one, so
//! duplicate and out-of-order deliveries are absorbed without locking.

use crate::{TierStage, Timestamp, UserId, VerificationStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;
pub mod resolver;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStageRepository;
pub use resolver::resolve;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStageRepository;

// ============================================================================
// Core Types
// ============================================================================

/// Last known status of one tier stage for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub user_id: UserId,
    pub stage: TierStage,
    pub status: VerificationStatus,
    pub updated_at: Timestamp,
}

impl StageRecord {
    pub fn new(
        user_id: UserId,
        stage: TierStage,
        status: VerificationStatus,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            user_id,
            stage,
            status,
            updated_at,
        }
    }
}

/// A user's resolved current stage together with the records it was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStage {
    pub user_id: UserId,
    pub stage: TierStage,
    pub records: Vec<StageRecord>,
}

impl ResolvedStage {
    pub fn from_records(user_id: UserId, records: Vec<StageRecord>) -> Self {
        Self {
            stage: resolve(&records),
            user_id,
            records,
        }
    }
}

/// Whether an upsert changed the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Row inserted or replaced
    Applied,
    /// Stored row is as new or newer; the write was ignored
    Stale,
}

/// Stage store errors
#[derive(Debug, thiserror::Error)]
pub enum StageStoreError {
    #[error("Stage store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Stage store query failed: {message}")]
    Query { message: String },

    #[error("Stored stage record is invalid: {message}")]
    InvalidRecord { message: String },

    #[error("Cannot store a record without a tier stage")]
    UnknownStage,
}

impl StageStoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Query { .. } => true,
            Self::InvalidRecord { .. } => false,
            Self::UnknownStage => false,
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Persistence for stage records
#[async_trait]
pub trait StageRepository: Send + Sync {
    /// Insert or replace the `(user_id, stage)` row when `record.updated_at`
    /// is strictly newer than the stored value
    async fn upsert(&self, record: &StageRecord) -> Result<UpsertOutcome, StageStoreError>;

    /// All stage rows for `user_id`, oldest insertion first
    async fn records_for_user(&self, user_id: &UserId) -> Result<Vec<StageRecord>, StageStoreError>;

    /// Resolve the user's current stage from the stored rows
    async fn current_stage(&self, user_id: &UserId) -> Result<ResolvedStage, StageStoreError> {
        let records = self.records_for_user(user_id).await?;
        Ok(ResolvedStage::from_records(user_id.clone(), records))
    }
}
