//! Message types for bus operations including exchange, queue and routing-key names.

use crate::error::{BusError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Content type attached to every JSON message published on the bus
pub const JSON_CONTENT_TYPE: &str = "application/json";

const MAX_NAME_LENGTH: usize = 255;

// ============================================================================
// Names
// ============================================================================

fn validate_name(field: &str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", MAX_NAME_LENGTH),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, '-', '_', '.', ':' allowed".to_string(),
        });
    }

    Ok(())
}

/// Validated name of a topic exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeName(String);

impl ExchangeName {
    /// Create new exchange name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name("exchange", &name)?;
        Ok(Self(name))
    }

    /// Get exchange name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExchangeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExchangeName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validated name of a durable queue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_name("queue", &name)?;
        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Dot-delimited routing key, e.g. `customer.verified`.
///
/// Binding keys may use the topic wildcards `*` (exactly one word) and `#`
/// (zero or more words). Keys used for publishing should be concrete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Create new routing key with validation
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();

        if key.is_empty() {
            return Err(ValidationError::Required {
                field: "routing_key".to_string(),
            });
        }

        if key.len() > MAX_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "routing_key".to_string(),
                message: format!("must be 1-{} characters", MAX_NAME_LENGTH),
            });
        }

        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidFormat {
                field: "routing_key".to_string(),
                message: "only printable ASCII without whitespace allowed".to_string(),
            });
        }

        if key.split('.').any(|word| word.is_empty()) {
            return Err(ValidationError::InvalidFormat {
                field: "routing_key".to_string(),
                message: "empty words (leading, trailing or consecutive dots) not allowed"
                    .to_string(),
            });
        }

        Ok(Self(key))
    }

    /// Get routing key as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this key contains topic wildcards
    pub fn is_pattern(&self) -> bool {
        self.0.split('.').any(|word| word == "*" || word == "#")
    }

    /// Check whether this key, used as a binding pattern, matches a concrete routing key
    pub fn matches(&self, routing_key: &str) -> bool {
        let pattern: Vec<&str> = self.0.split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        topic_matches(&pattern, &key)
    }
}

impl std::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RoutingKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            topic_matches(&pattern[1..], key)
                || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => topic_matches(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => topic_matches(&pattern[1..], &key[1..]),
        _ => false,
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Unique identifier attached to every published message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message ready to be published
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Create a message from an already-encoded JSON body
    pub fn new(body: Bytes) -> Self {
        Self {
            message_id: MessageId::new(),
            body,
            content_type: JSON_CONTENT_TYPE.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize a value to JSON and wrap it in a message
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, BusError> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(Bytes::from(body)))
    }
}

/// A message delivered to a consumer, awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    /// Set by the broker when this message was delivered before and not acknowledged
    pub redelivered: bool,
}

impl Delivery {
    /// Decode the JSON body
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
