//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use kyc_relay_core::{StageStoreError, ValidationError, WebhookError};
use tracing::{error, warn};

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Webhook handler errors with HTTP status code mapping
///
/// - `401 Unauthorized`: signature missing or wrong, nothing was published
/// - `400 Bad Request`: body is not a usable webhook payload
/// - `500 Internal Server Error`: the event could not be published; the
///   provider retries delivery on any 5xx
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    #[error("Processing failed: {0}")]
    ProcessingFailed(#[from] WebhookError),

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProcessingFailed(WebhookError::InvalidSignature(_)) => StatusCode::UNAUTHORIZED,
            Self::ProcessingFailed(WebhookError::MalformedPayload(_)) => StatusCode::BAD_REQUEST,
            Self::ProcessingFailed(WebhookError::Publish(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::ProcessingFailed(WebhookError::InvalidSignature(_)) => {
                warn!(error = %self, "Webhook rejected");
                "Invalid webhook signature".to_string()
            }
            Self::ProcessingFailed(WebhookError::MalformedPayload(_)) => {
                warn!(error = %self, "Webhook rejected");
                self.to_string()
            }
            Self::ProcessingFailed(WebhookError::Publish(_)) | Self::InternalError { .. } => {
                // Log detailed error server-side but return generic message to client
                error!(error = %self, "Webhook processing failed");
                "Event could not be delivered. Please retry later.".to_string()
            }
        };

        error_response(status, message)
    }
}

/// Errors from the read-only stage view
#[derive(Debug, thiserror::Error)]
pub enum StageQueryError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(#[from] ValidationError),

    #[error("Stage store error: {0}")]
    Store(#[from] StageStoreError),
}

impl IntoResponse for StageQueryError {
    fn into_response(self) -> Response {
        match &self {
            Self::InvalidUserId(_) => error_response(StatusCode::BAD_REQUEST, self.to_string()),
            Self::Store(e) => {
                error!(error = %e, "Stage lookup failed");
                let status = if e.is_transient() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                error_response(status, "Stage store unavailable".to_string())
            }
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    let body = serde_json::json!({
        "error": message,
        "status": status.as_u16(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status, Json(body)).into_response()
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}
