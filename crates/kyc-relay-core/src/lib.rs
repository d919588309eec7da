//! # KYC Relay Core
//!
//! Core business logic for the KYC Relay verification pipeline.
//!
//! This crate contains the domain logic for authenticating provider webhooks,
//! classifying them into canonical verification events, routing those events
//! onto the message bus, and resolving each user's current verification stage
//! on the consumer side.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions
//! - Infrastructure (bus, stage store, provider HTTP API) is injected at runtime
//! - The webhook side never writes stage records; only consumer handlers do
//!
//! ## Usage
//!
//! ```rust
//! use kyc_relay_core::{EventId, TierStage};
//!
//! let event_id = EventId::new();
//! assert_eq!(TierStage::Tier2.as_str(), "tier2");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for canonical verification events
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

fn validate_identifier(field: &str, value: &str, max_length: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > max_length {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max_length,
        });
    }

    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidCharacters {
            field: field.to_string(),
            invalid_chars: "non-ASCII or whitespace".to_string(),
        });
    }

    Ok(())
}

/// Internal user identifier owning stage records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct UserId(String);

impl UserId {
    /// Create new user ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("user_id", &value, 128)?;
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Identifier of a customer resource at the provider, e.g. `1234-anc_ind_cst`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create new resource ID with validation
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        validate_identifier("resource_id", &value, 255)?;
        Ok(Self(value))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Identifier for tracing requests across system boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Verification Types
// ============================================================================

/// KYC verification level a user progresses through.
///
/// `Unknown` is the empty stage: the event did not say which tier it was
/// about. Ordering follows tier priority, so `Tier3 > Tier2 > Tier1 > Unknown`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum TierStage {
    #[default]
    #[serde(rename = "")]
    Unknown,
    #[serde(rename = "tier1")]
    Tier1,
    #[serde(rename = "tier2")]
    Tier2,
    #[serde(rename = "tier3")]
    Tier3,
}

impl TierStage {
    /// Canonical label, empty for `Unknown`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::Tier3 => "tier3",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Normalize a free-form provider tier label.
    ///
    /// Lower-cases the label, removes `kyc_tier`, `tier` and underscores,
    /// then keeps only digits. `1`, `2` and `3` map to the matching tier;
    /// anything else is `Unknown`.
    ///
    /// ```rust
    /// use kyc_relay_core::TierStage;
    ///
    /// assert_eq!(TierStage::normalize("TIER_1"), TierStage::Tier1);
    /// assert_eq!(TierStage::normalize("kyc_tier_2"), TierStage::Tier2);
    /// assert_eq!(TierStage::normalize(" 3 "), TierStage::Tier3);
    /// assert_eq!(TierStage::normalize("gold"), TierStage::Unknown);
    /// ```
    pub fn normalize(label: &str) -> Self {
        let lowered = label
            .to_lowercase()
            .replace("kyc_tier", "")
            .replace("tier", "")
            .replace('_', "");
        let digits: String = lowered.chars().filter(|c| c.is_ascii_digit()).collect();

        match digits.as_str() {
            "1" => Self::Tier1,
            "2" => Self::Tier2,
            "3" => Self::Tier3,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TierStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TierStage {
    type Err = ParseError;

    /// Parse a canonical label (`tier1`..`tier3`, or empty for unknown)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Unknown),
            "tier1" => Ok(Self::Tier1),
            "tier2" => Ok(Self::Tier2),
            "tier3" => Ok(Self::Tier3),
            other => Err(ParseError::InvalidFormat {
                expected: "tier1, tier2, tier3 or empty".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

/// Status of a verification attempt for one tier stage.
///
/// Status values do not form a linear sequence: a rejected stage may later be
/// superseded by a fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Processing,
    ManualReview,
    Approved,
    Rejected,
    Error,
    /// Downstream onboarding for the stage has finished
    Completed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::ManualReview => "manual_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }

    /// Whether the provider is done with this attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Error | Self::Completed
        )
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "manual_review" => Ok(Self::ManualReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "error" => Ok(Self::Error),
            "completed" => Ok(Self::Completed),
            other => Err(ParseError::InvalidFormat {
                expected: "verification status".to_string(),
                actual: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing UTC datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + chrono::Duration::seconds(seconds))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Security-related failures requiring immediate attention
    Security,
    /// Configuration errors preventing startup
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Webhook signature validation
pub mod signature;

/// Webhook payload parsing, classification and processing
pub mod webhook;

/// Per-user stage records, resolution and persistence
pub mod stage;

/// Canonical event routing onto the message bus
pub mod routing;

/// Provider resource to internal user lookup
pub mod directory;

/// Consumer-side message handlers
pub mod handlers;

/// Provider customer provisioning API client
pub mod provisioning;

// Re-export key types for convenience
pub use directory::{CustomerDirectory, DirectoryError, InMemoryCustomerDirectory};
pub use handlers::{AccountOpener, AccountOpeningError, LoggingAccountOpener, StageUpdateHandler};
pub use provisioning::{
    CustomerRequest, CustomerResponse, ExistingIdExtractor, ProvisioningClient,
    ProvisioningConfig, ProvisioningError, SuffixIdExtractor,
};
pub use routing::{
    routing_key_for, BusEventRouter, EventRouter, RoutingError, ROUTING_KEY_TIER_STATUS,
    ROUTING_KEY_VERIFIED,
};
pub use signature::{
    sign_legacy, sign_sha256, validate, SignatureCheck, SignatureRejection, SignatureScheme,
    WebhookSecret,
};
pub use stage::{
    resolve, InMemoryStageRepository, ResolvedStage, StageRecord, StageRepository,
    StageStoreError, UpsertOutcome,
};
pub use webhook::{
    CanonicalVerificationEvent, ClassifiedEvent, EventSuffix, ProcessingOutcome,
    VerificationWebhookProcessor, WebhookError, WebhookPayload, WebhookRequest,
};

#[cfg(feature = "postgres")]
pub use directory::PostgresCustomerDirectory;
#[cfg(feature = "postgres")]
pub use stage::PostgresStageRepository;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
