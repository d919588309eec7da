//! Error types for bus operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Connection attempt timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Channel unavailable: {message}")]
    ChannelUnavailable { message: String },

    #[error("Failed to declare exchange '{exchange}': {message}")]
    DeclareFailed { exchange: String, message: String },

    #[error("Failed to declare or bind queue '{queue}': {message}")]
    QueueSetupFailed { queue: String, message: String },

    #[error("Publish to '{exchange}' with key '{routing_key}' failed: {message}")]
    PublishFailed {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Acknowledgement failed for delivery {delivery_tag}: {message}")]
    AckFailed { delivery_tag: u64, message: String },

    #[error("Subscription on queue '{queue}' ended: {message}")]
    SubscriptionEnded { queue: String, message: String },

    #[error("Broker is closed")]
    Closed,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl BusError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::ChannelUnavailable { .. } => true,
            Self::DeclareFailed { .. } => true,
            Self::QueueSetupFailed { .. } => true,
            Self::PublishFailed { .. } => true,
            Self::AckFailed { .. } => true,
            Self::SubscriptionEnded { .. } => true,
            Self::Closed => false,
            Self::Serialization(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Check if error should be retried
    pub fn should_retry(&self) -> bool {
        self.is_transient()
    }
}

/// Validation errors for bus names and routing keys
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
