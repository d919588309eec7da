//! In-memory stage repository for tests and local runs.

use super::{StageRecord, StageRepository, StageStoreError, UpsertOutcome};
use crate::UserId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Stage rows held in a map keyed by user. Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryStageRepository {
    records: Arc<RwLock<HashMap<UserId, Vec<StageRecord>>>>,
}

impl InMemoryStageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StageStoreError {
        StageStoreError::Unavailable {
            message: "stage store lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl StageRepository for InMemoryStageRepository {
    async fn upsert(&self, record: &StageRecord) -> Result<UpsertOutcome, StageStoreError> {
        if !record.stage.is_known() {
            return Err(StageStoreError::UnknownStage);
        }

        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let rows = records.entry(record.user_id.clone()).or_default();

        match rows.iter_mut().find(|row| row.stage == record.stage) {
            Some(existing) if existing.updated_at < record.updated_at => {
                existing.status = record.status;
                existing.updated_at = record.updated_at;
                Ok(UpsertOutcome::Applied)
            }
            Some(_) => Ok(UpsertOutcome::Stale),
            None => {
                rows.push(record.clone());
                Ok(UpsertOutcome::Applied)
            }
        }
    }

    async fn records_for_user(&self, user_id: &UserId) -> Result<Vec<StageRecord>, StageStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.get(user_id).cloned().unwrap_or_default())
    }
}
