//! Classification of provider webhooks into canonical verification events.

use super::payload::WebhookPayload;
use crate::{EventId, ResourceId, TierStage, Timestamp, VerificationStatus};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;

// ============================================================================
// Event suffixes
// ============================================================================

/// Closed set of event-name suffixes the pipeline acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSuffix {
    Approved,
    Rejected,
    ManualReview,
    Error,
}

/// Suffix → status transition table
const TRANSITIONS: [(&str, EventSuffix, VerificationStatus); 4] = [
    ("approved", EventSuffix::Approved, VerificationStatus::Approved),
    ("rejected", EventSuffix::Rejected, VerificationStatus::Rejected),
    (
        "manualReview",
        EventSuffix::ManualReview,
        VerificationStatus::ManualReview,
    ),
    ("error", EventSuffix::Error, VerificationStatus::Error),
];

impl EventSuffix {
    /// Look up the trailing segment of `event_type`. Exact, case-sensitive match.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        let segment = event_type.rsplit('.').next()?;
        TRANSITIONS
            .iter()
            .find(|(name, _, _)| *name == segment)
            .map(|(_, suffix, _)| *suffix)
    }

    /// Status this suffix transitions a stage to
    pub fn status(&self) -> VerificationStatus {
        TRANSITIONS
            .iter()
            .find(|(_, suffix, _)| suffix == self)
            .map(|(_, _, status)| *status)
            .unwrap_or(VerificationStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ManualReview => "manualReview",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Canonical event
// ============================================================================

/// Internal representation of one classified provider webhook.
///
/// Immutable once produced. May be delivered more than once downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalVerificationEvent {
    pub event_id: EventId,

    /// Provider event name the event was classified from
    pub event_type: String,

    pub resource_id: ResourceId,

    /// Empty when the payload did not identify a tier
    pub tier_stage: TierStage,

    pub status: VerificationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub occurred_at: Timestamp,
}

/// Outcome of classifying a payload
#[derive(Debug, Clone)]
pub enum ClassifiedEvent {
    Verification(CanonicalVerificationEvent),
    /// Event name outside the closed suffix set. Logged, never published.
    Unhandled { event_type: String, raw: Bytes },
}

/// Classify `payload`, stamping it with the current time
pub fn classify(payload: &WebhookPayload) -> ClassifiedEvent {
    classify_at(payload, Timestamp::now())
}

/// Classify `payload` as having occurred at `occurred_at`
pub fn classify_at(payload: &WebhookPayload, occurred_at: Timestamp) -> ClassifiedEvent {
    let Some(suffix) = EventSuffix::from_event_type(&payload.event) else {
        return ClassifiedEvent::Unhandled {
            event_type: payload.event.clone(),
            raw: payload.raw.clone(),
        };
    };

    let tier_stage = extract_stage(payload);
    let reason = extract_reason(payload);

    debug!(
        event_type = %payload.event,
        resource_id = %payload.data.id,
        tier_stage = %tier_stage,
        status = %suffix.status(),
        "Classified verification event"
    );

    ClassifiedEvent::Verification(CanonicalVerificationEvent {
        event_id: EventId::new(),
        event_type: payload.event.clone(),
        resource_id: payload.data.id.clone(),
        tier_stage,
        status: suffix.status(),
        reason,
        occurred_at,
    })
}

/// `attributes.message`, falling back to `attributes.detail`. Blank text counts as absent.
pub fn extract_reason(payload: &WebhookPayload) -> Option<String> {
    let attributes = &payload.data.attributes;
    [&attributes.message, &attributes.detail]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .cloned()
}

/// Determine the tier stage, never guessing.
///
/// Order: `attributes.level`, `attributes.verification.level`, then the first
/// `included[]` resource of type `Verification` that has a level.
pub fn extract_stage(payload: &WebhookPayload) -> TierStage {
    let attributes = &payload.data.attributes;

    let own_level = attributes
        .level
        .as_deref()
        .map(TierStage::normalize)
        .filter(TierStage::is_known)
        .or_else(|| {
            attributes
                .verification
                .as_ref()
                .and_then(|block| block.level.as_deref())
                .map(TierStage::normalize)
                .filter(TierStage::is_known)
        });

    if let Some(stage) = own_level {
        return stage;
    }

    payload
        .included
        .iter()
        .filter(|resource| resource.is_verification())
        .find_map(|resource| {
            resource
                .attributes
                .level
                .as_deref()
                .map(TierStage::normalize)
                .filter(TierStage::is_known)
        })
        .unwrap_or_default()
}
