//! PostgreSQL implementation of [`StageRepository`].
//!
//! Schema lives in `migrations/`. The upsert only overwrites a row when the
//! incoming `updated_at` is strictly newer, so concurrent consumers need no
//! in-process locking.

use super::{StageRecord, StageRepository, StageStoreError, UpsertOutcome};
use crate::{TierStage, Timestamp, UserId, VerificationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Embedded migrations for the stage store
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Stage repository backed by a PostgreSQL connection pool
pub struct PostgresStageRepository {
    pool: PgPool,
}

impl PostgresStageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with at most `max_connections` pooled connections
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StageStoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StageStoreError::Unavailable {
                message: format!("Failed to connect to stage store: {}", e),
            })?;
        Ok(Self::new(pool))
    }

    /// Pool shared with other stores on the same database
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<(), StageStoreError> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StageStoreError::Unavailable {
                message: format!("Failed to run stage store migrations: {}", e),
            })
    }
}

/// Database row representation of a stage record
#[derive(Debug, sqlx::FromRow)]
struct StageRow {
    user_id: String,
    stage: String,
    status: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StageRow> for StageRecord {
    type Error = StageStoreError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let invalid = |message: String| StageStoreError::InvalidRecord { message };

        Ok(StageRecord {
            user_id: UserId::new(row.user_id).map_err(|e| invalid(format!("user_id: {}", e)))?,
            stage: row
                .stage
                .parse::<TierStage>()
                .map_err(|e| invalid(format!("stage: {}", e)))?,
            status: row
                .status
                .parse::<VerificationStatus>()
                .map_err(|e| invalid(format!("status: {}", e)))?,
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

fn query_failed(action: &str, e: sqlx::Error) -> StageStoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StageStoreError::Unavailable {
                message: format!("Failed to {}: {}", action, e),
            }
        }
        other => StageStoreError::Query {
            message: format!("Failed to {}: {}", action, other),
        },
    }
}

#[async_trait]
impl StageRepository for PostgresStageRepository {
    async fn upsert(&self, record: &StageRecord) -> Result<UpsertOutcome, StageStoreError> {
        if !record.stage.is_known() {
            return Err(StageStoreError::UnknownStage);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO stage_records (user_id, stage, status, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, stage) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            WHERE stage_records.updated_at < EXCLUDED.updated_at
            "#,
        )
        .bind(record.user_id.as_str())
        .bind(record.stage.as_str())
        .bind(record.status.as_str())
        .bind(record.updated_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("upsert stage record", e))?;

        if result.rows_affected() == 0 {
            Ok(UpsertOutcome::Stale)
        } else {
            Ok(UpsertOutcome::Applied)
        }
    }

    async fn records_for_user(&self, user_id: &UserId) -> Result<Vec<StageRecord>, StageStoreError> {
        let rows: Vec<StageRow> = sqlx::query_as(
            r#"
            SELECT user_id, stage, status, updated_at
            FROM stage_records
            WHERE user_id = $1
            ORDER BY created_at, stage
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("load stage records", e))?;

        rows.into_iter().map(StageRecord::try_from).collect()
    }
}
