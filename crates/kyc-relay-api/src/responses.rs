//! Response types for the API.

use kyc_relay_bus::ProviderType;
use kyc_relay_core::{ResolvedStage, StageRecord, Timestamp};
use serde::Serialize;

/// Webhook processing response
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,

    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: Timestamp,
    pub bus: BusStatus,
    pub consumer: ConsumerState,
}

/// Which publisher the webhook side is using
#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    pub provider: ProviderType,

    /// Publishes are being dropped because the broker was unreachable at boot
    pub degraded: bool,
}

/// Lifecycle of the stage-update consumer task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    /// No consumer for this bus mode, or not spawned yet
    NotStarted,
    Running,
    /// The consumer loop returned; stage updates are no longer processed
    Stopped,
}

/// Resolved stage for one user
#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub user_id: String,

    /// Empty when the user has no stage yet
    pub stage: String,

    pub records: Vec<StageRecordView>,
}

#[derive(Debug, Serialize)]
pub struct StageRecordView {
    pub stage: String,
    pub status: String,
    pub updated_at: String,
}

impl From<&StageRecord> for StageRecordView {
    fn from(record: &StageRecord) -> Self {
        Self {
            stage: record.stage.as_str().to_string(),
            status: record.status.as_str().to_string(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

impl From<ResolvedStage> for StageResponse {
    fn from(resolved: ResolvedStage) -> Self {
        Self {
            user_id: resolved.user_id.to_string(),
            stage: resolved.stage.as_str().to_string(),
            records: resolved.records.iter().map(StageRecordView::from).collect(),
        }
    }
}
