//! Typed view of the provider's webhook body.
//!
//! The body follows a JSON:API-like envelope:
//!
//! ```json
//! {
//!   "event": "customer.identification.approved",
//!   "data": { "id": "1234-anc_ind_cst", "type": "individualCustomer", "attributes": { ... } },
//!   "included": [ { "id": "...", "type": "Verification", "attributes": { "level": "TIER_2" } } ]
//! }
//! ```
//!
//! Only the attributes the pipeline reads are typed. Unexpected attribute
//! types degrade to "absent" instead of failing the whole payload.

use crate::ResourceId;
use bytes::Bytes;
use serde::{Deserialize, Deserializer};

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;

/// Resource type carrying a verification level in `included[]`
pub const VERIFICATION_RESOURCE_TYPE: &str = "Verification";

/// Error returned when a body cannot be read as a webhook payload
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Body is not valid webhook JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Webhook payload field '{field}' is missing or empty")]
    MissingField { field: String },
}

/// Parsed webhook body
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// Dot-delimited provider event name, e.g. `customer.identification.rejected`
    pub event: String,

    pub data: PrimaryResource,

    #[serde(default)]
    pub included: Vec<IncludedResource>,

    /// Exact bytes the payload was parsed from, kept for diagnostics
    #[serde(skip)]
    pub raw: Bytes,
}

impl WebhookPayload {
    /// Parse and validate the envelope of `raw`
    pub fn parse(raw: Bytes) -> Result<Self, PayloadError> {
        let mut payload: WebhookPayload = serde_json::from_slice(&raw)?;

        if payload.event.trim().is_empty() {
            return Err(PayloadError::MissingField {
                field: "event".to_string(),
            });
        }

        payload.raw = raw;
        Ok(payload)
    }

    /// Trailing dot-segment of the event name
    pub fn event_suffix(&self) -> &str {
        self.event.rsplit('.').next().unwrap_or_default()
    }
}

/// The resource the event is about (the customer)
#[derive(Debug, Clone, Deserialize)]
pub struct PrimaryResource {
    pub id: ResourceId,

    #[serde(rename = "type", default)]
    pub resource_type: String,

    #[serde(default)]
    pub attributes: VerificationAttributes,
}

/// A side-loaded resource in `included[]`
#[derive(Debug, Clone, Deserialize)]
pub struct IncludedResource {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub resource_type: String,

    #[serde(default)]
    pub attributes: VerificationAttributes,
}

impl IncludedResource {
    pub fn is_verification(&self) -> bool {
        self.resource_type
            .eq_ignore_ascii_case(VERIFICATION_RESOURCE_TYPE)
    }
}

/// Attributes the classifier reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationAttributes {
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,

    #[serde(default, deserialize_with = "lenient_text")]
    pub detail: Option<String>,

    #[serde(default, deserialize_with = "lenient_text")]
    pub level: Option<String>,

    #[serde(default)]
    pub verification: Option<VerificationBlock>,
}

/// Nested `attributes.verification` object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationBlock {
    #[serde(default, deserialize_with = "lenient_text")]
    pub level: Option<String>,
}

/// Read strings as-is and numbers as their decimal text; anything else is absent.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}
