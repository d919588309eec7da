//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use kyc_relay_bus::{BusConfig, BusMode};
use kyc_relay_core::{ProvisioningConfig, ResourceId, UserId, WebhookSecret};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Service configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook endpoint settings
    pub webhook: WebhookConfig,

    /// Message bus settings
    pub bus: BusConfig,

    /// Provider provisioning API settings
    pub provider: ProvisioningConfig,

    /// Stage store settings
    pub database: DatabaseConfig,

    /// Static customer mappings for runs without a database
    pub directory: DirectoryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if !self.webhook.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhook.endpoint_path must start with '/', got '{}'",
                    self.webhook.endpoint_path
                ),
            });
        }

        if self.webhook.signature_header.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "webhook.signature_header".to_string(),
            });
        }

        if self.bus.exchange.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "bus.exchange".to_string(),
            });
        }

        if self.bus.mode == BusMode::Amqp && self.bus.amqp.url.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "bus.amqp.url".to_string(),
            });
        }

        if self.database.url.is_some() && self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                message: "database.max_connections must be at least 1".to_string(),
            });
        }

        for (resource_id, user_id) in &self.directory.customers {
            ResourceId::new(resource_id.as_str())
                .and_then(|_| UserId::new(user_id.as_str()))
                .map_err(|e| ConfigError::Invalid {
                    message: format!("directory.customers entry '{}': {}", resource_id, e),
                })?;
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Webhook endpoint configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Header carrying the provider signature
    pub signature_header: String,

    /// Shared signing secret. Empty disables signature checks.
    pub secret: String,
}

impl WebhookConfig {
    pub fn webhook_secret(&self) -> WebhookSecret {
        WebhookSecret::new(self.secret.clone())
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/webhooks/anchor".to_string(),
            signature_header: "x-anchor-signature".to_string(),
            secret: String::new(),
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("endpoint_path", &self.endpoint_path)
            .field("signature_header", &self.signature_header)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Stage store configuration. Without a URL the in-memory store is used.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            run_migrations: true,
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<REDACTED>"))
            .field("max_connections", &self.max_connections)
            .field("run_migrations", &self.run_migrations)
            .finish()
    }
}

/// Provider resource id to user id pairs loaded into the in-memory directory
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DirectoryConfig {
    pub customers: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "kyc_relay_service=info,kyc_relay_api=info,kyc_relay_core=info,kyc_relay_bus=info,tower_http=debug".to_string(),
            json_format: false,
        }
    }
}
