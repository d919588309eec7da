//! Client for the provider's customer provisioning REST API.
//!
//! All requests carry the provider API key header and JSON bodies shaped as
//! `{ "data": { "type": ..., "attributes": ... } }`. Creating a customer that
//! already exists is reported as a soft conflict so callers can switch to the
//! update path instead of retrying creation.

use regex::Regex;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
#[path = "provisioning_tests.rs"]
mod tests;

/// Phrase the provider uses in conflict responses, compared case-insensitively
const ALREADY_EXISTS_PHRASE: &str = "already exist";

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for the provisioning API
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Base URL of the provider API, e.g. `https://api.sandbox.getanchor.co/api/v1`
    pub base_url: String,

    /// API key sent on every request
    pub api_key: String,

    /// Header carrying the API key
    pub api_key_header: String,

    /// Fixed per-request timeout
    pub timeout_seconds: u64,

    /// Tag that terminates every customer id issued by the provider
    pub id_suffix: String,
}

impl ProvisioningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sandbox.getanchor.co/api/v1".to_string(),
            api_key: String::new(),
            api_key_header: "x-anchor-key".to_string(),
            timeout_seconds: 20,
            id_suffix: "-anc_ind_cst".to_string(),
        }
    }
}

impl fmt::Debug for ProvisioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .field("api_key_header", &self.api_key_header)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("id_suffix", &self.id_suffix)
            .finish()
    }
}

// ============================================================================
// Request and Response Documents
// ============================================================================

/// Resource document sent to the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerRequest {
    data: RequestResource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct RequestResource {
    #[serde(rename = "type")]
    resource_type: String,
    attributes: serde_json::Value,
}

impl CustomerRequest {
    pub fn new(resource_type: impl Into<String>, attributes: serde_json::Value) -> Self {
        Self {
            data: RequestResource {
                resource_type: resource_type.into(),
                attributes,
            },
        }
    }

    /// Individual customer creation or update
    pub fn individual(attributes: serde_json::Value) -> Self {
        Self::new("IndividualCustomer", attributes)
    }

    /// Verification submission for an existing customer
    pub fn verification(attributes: serde_json::Value) -> Self {
        Self::new("Verification", attributes)
    }

    pub fn resource_type(&self) -> &str {
        &self.data.resource_type
    }

    pub fn attributes(&self) -> &serde_json::Value {
        &self.data.attributes
    }
}

/// Resource document returned by the provider
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomerResponse {
    data: ResponseResource,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ResponseResource {
    id: String,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    attributes: serde_json::Value,
}

impl CustomerResponse {
    /// Provider-assigned identifier of the resource
    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn resource_type(&self) -> &str {
        &self.data.resource_type
    }

    pub fn attributes(&self) -> &serde_json::Value {
        &self.data.attributes
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the provisioning API
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Invalid provisioning configuration: {message}")]
    Configuration { message: String },

    #[error("Customer already exists: {existing_id}")]
    AlreadyExists { existing_id: String },

    #[error("Customer already exists but no id could be extracted")]
    AlreadyExistsWithoutId { body: String },

    #[error("Provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Provider request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Provider request failed: {message}")]
    Transport { message: String },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },
}

impl ProvisioningError {
    /// Check if the provider reported an existing customer
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::AlreadyExistsWithoutId { .. }
        )
    }

    /// Check if error is transient and the call may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Existing customer id carried by a conflict, if any
    pub fn existing_id(&self) -> Option<&str> {
        match self {
            Self::AlreadyExists { existing_id } => Some(existing_id),
            _ => None,
        }
    }
}

// ============================================================================
// Existing Id Extraction
// ============================================================================

/// Recovers an existing customer id from a conflict response body
pub trait ExistingIdExtractor: Send + Sync {
    fn extract(&self, body: &str) -> Option<String>;
}

/// Finds the first token ending in the provider's id suffix
#[derive(Debug, Clone)]
pub struct SuffixIdExtractor {
    pattern: Regex,
}

impl SuffixIdExtractor {
    pub fn new(suffix: &str) -> Result<Self, ProvisioningError> {
        if suffix.is_empty() {
            return Err(ProvisioningError::Configuration {
                message: "id suffix must not be empty".to_string(),
            });
        }

        let pattern = Regex::new(&format!(r"[A-Za-z0-9]+{}", regex::escape(suffix))).map_err(
            |e| ProvisioningError::Configuration {
                message: format!("invalid id suffix pattern: {}", e),
            },
        )?;

        Ok(Self { pattern })
    }
}

impl ExistingIdExtractor for SuffixIdExtractor {
    fn extract(&self, body: &str) -> Option<String> {
        self.pattern.find(body).map(|m| m.as_str().to_string())
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for customer provisioning
#[derive(Clone)]
pub struct ProvisioningClient {
    http: reqwest::Client,
    base_url: String,
    config: ProvisioningConfig,
    extractor: Arc<dyn ExistingIdExtractor>,
}

impl fmt::Debug for ProvisioningClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProvisioningClient {
    /// Build a client using a [`SuffixIdExtractor`] for `config.id_suffix`
    pub fn new(config: ProvisioningConfig) -> Result<Self, ProvisioningError> {
        let extractor = SuffixIdExtractor::new(&config.id_suffix)?;
        Self::with_extractor(config, Arc::new(extractor))
    }

    pub fn with_extractor(
        config: ProvisioningConfig,
        extractor: Arc<dyn ExistingIdExtractor>,
    ) -> Result<Self, ProvisioningError> {
        url::Url::parse(&config.base_url).map_err(|e| ProvisioningError::Configuration {
            message: format!("invalid base_url '{}': {}", config.base_url, e),
        })?;

        if config.api_key_header.trim().is_empty() {
            return Err(ProvisioningError::Configuration {
                message: "api_key_header must not be empty".to_string(),
            });
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProvisioningError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config,
            extractor,
        })
    }

    /// Create an individual customer.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` / `AlreadyExistsWithoutId` when the provider reports a duplicate
    /// - `Api` for any other non-success status
    #[instrument(skip(self, request), fields(resource_type = %request.resource_type()))]
    pub async fn create_customer(
        &self,
        request: &CustomerRequest,
    ) -> Result<CustomerResponse, ProvisioningError> {
        let response = self.send(Method::POST, "/customers", request).await?;
        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let created: CustomerResponse = decode(response).await?;
            info!(customer_id = %created.id(), "Customer created");
            return Ok(created);
        }

        let body = read_body(response).await;
        if body.to_lowercase().contains(ALREADY_EXISTS_PHRASE) {
            return Err(match self.extractor.extract(&body) {
                Some(existing_id) => {
                    info!(existing_id = %existing_id, "Customer already exists");
                    ProvisioningError::AlreadyExists { existing_id }
                }
                None => {
                    warn!("Customer already exists but response carried no recognizable id");
                    ProvisioningError::AlreadyExistsWithoutId { body }
                }
            });
        }

        warn!(status = status.as_u16(), "Customer creation failed");
        Err(ProvisioningError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Submit an individual verification for `customer_id`
    #[instrument(skip(self, request))]
    pub async fn submit_individual_verification(
        &self,
        customer_id: &str,
        request: &CustomerRequest,
    ) -> Result<CustomerResponse, ProvisioningError> {
        let path = format!("/customers/{}/verification/individual", customer_id);
        let response = self.send(Method::POST, &path, request).await?;
        expect_success(response).await
    }

    /// Update an existing customer's attributes
    #[instrument(skip(self, request))]
    pub async fn update_customer(
        &self,
        customer_id: &str,
        request: &CustomerRequest,
    ) -> Result<CustomerResponse, ProvisioningError> {
        let path = format!("/customers/update/{}", customer_id);
        let response = self.send(Method::PUT, &path, request).await?;
        expect_success(response).await
    }

    /// Create the customer, or update it when the provider already knows it.
    ///
    /// Returns the customer id. A conflict without an extractable id is
    /// returned to the caller unchanged.
    #[instrument(skip(self, create, update))]
    pub async fn ensure_customer(
        &self,
        create: &CustomerRequest,
        update: &CustomerRequest,
    ) -> Result<String, ProvisioningError> {
        match self.create_customer(create).await {
            Ok(created) => Ok(created.id().to_string()),
            Err(ProvisioningError::AlreadyExists { existing_id }) => {
                self.update_customer(&existing_id, update).await?;
                Ok(existing_id)
            }
            Err(e) => Err(e),
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: &CustomerRequest,
    ) -> Result<reqwest::Response, ProvisioningError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Sending provisioning request");

        self.http
            .request(method, &url)
            .header(self.config.api_key_header.as_str(), self.config.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProvisioningError::Timeout {
                        timeout: self.config.timeout(),
                    }
                } else {
                    ProvisioningError::Transport {
                        message: e.to_string(),
                    }
                }
            })
    }
}

async fn expect_success(response: reqwest::Response) -> Result<CustomerResponse, ProvisioningError> {
    let status = response.status();
    if status.is_success() {
        return decode(response).await;
    }

    Err(ProvisioningError::Api {
        status: status.as_u16(),
        body: read_body(response).await,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProvisioningError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProvisioningError::InvalidResponse {
            message: e.to_string(),
        })
}

/// Body text for error reporting; empty when the body cannot be read
async fn read_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(status = status.as_u16(), error = %e, "Failed to read provider response body");
            String::new()
        }
    }
}
