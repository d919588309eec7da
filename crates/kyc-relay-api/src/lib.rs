//! # KYC Relay HTTP Service
//!
//! HTTP surface for the KYC Relay verification pipeline.
//!
//! This crate provides:
//! - Provider webhook endpoint with signature validation
//! - Health, readiness and Prometheus metrics endpoints
//! - A read-only view of each user's resolved verification stage
//!
//! The webhook handler hands the exact request bytes to
//! [`VerificationWebhookProcessor`]; nothing is parsed before the signature
//! has been checked.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{
    DatabaseConfig, DirectoryConfig, LoggingConfig, ServerConfig, ServiceConfig, WebhookConfig,
};
pub use errors::{ConfigError, ServiceError, StageQueryError, WebhookHandlerError};
pub use metrics::ServiceMetrics;
pub use responses::{
    BusStatus, ConsumerState, HealthResponse, ReadinessResponse, StageRecordView, StageResponse,
    WebhookResponse,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Extension, Router,
};
use bytes::Bytes;
use kyc_relay_core::{
    CorrelationId, ProcessingOutcome, StageRepository, Timestamp, UserId,
    VerificationWebhookProcessor, WebhookError, WebhookRequest,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Header used to correlate requests across services
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Webhook processor for provider verification callbacks
    pub processor: Arc<VerificationWebhookProcessor>,

    /// Stage store backing the read-only stage view
    pub stage_repository: Arc<dyn StageRepository>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,

    /// Publisher reported by the readiness endpoint
    pub bus_status: BusStatus,

    /// Stage-update consumer state reported by the readiness endpoint
    pub consumer: ConsumerHealth,
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: ServiceConfig,
        processor: Arc<VerificationWebhookProcessor>,
        stage_repository: Arc<dyn StageRepository>,
        metrics: Arc<ServiceMetrics>,
        bus_status: BusStatus,
    ) -> Self {
        Self {
            config: Arc::new(config),
            processor,
            stage_repository,
            metrics,
            bus_status,
            consumer: ConsumerHealth::new(),
        }
    }
}

/// Shared view of the consumer task's state. Clones observe the same value.
#[derive(Clone)]
pub struct ConsumerHealth {
    state: Arc<watch::Sender<ConsumerState>>,
}

impl ConsumerHealth {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ConsumerState::NotStarted);
        Self {
            state: Arc::new(sender),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    pub fn set(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }
}

impl Default for ConsumerHealth {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let webhook_routes =
        Router::new().route(&state.config.webhook.endpoint_path, post(handle_webhook));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/ready", get(handle_readiness_check));

    let api_routes = Router::new().route("/api/users/{user_id}/stage", get(get_user_stage));

    let observability_routes = Router::new().route("/metrics", get(metrics_endpoint));

    let max_body_size = state.config.server.max_body_size;

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(api_routes)
        .merge(observability_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(DefaultBodyLimit::max(max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Serve `state` on the configured address until `shutdown` resolves
pub async fn start_server<F>(
    config: &ServerConfig,
    state: AppState,
    shutdown: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);
    let address = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!("Starting HTTP server on {}", address);

    // In-flight requests complete before serve returns
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle provider verification webhooks
///
/// | Outcome | Status |
/// |---------|--------|
/// | published or ignored | 200 |
/// | bad signature | 401 |
/// | malformed body | 400 |
/// | publish failure | 500 |
#[instrument(skip_all, fields(correlation_id = %correlation_id))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, WebhookHandlerError> {
    let started = Instant::now();

    let signature = headers
        .get(state.config.webhook.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let request = WebhookRequest::new(body, signature).with_correlation_id(correlation_id);
    let result = state.processor.process(request).await;

    state.metrics.record_webhook_request(started.elapsed());

    match result {
        Ok(ProcessingOutcome::Published { event, routing_key }) => {
            state.metrics.record_published(routing_key.as_str());
            Ok(Json(WebhookResponse {
                status: "published".to_string(),
                event_id: Some(event.event_id.to_string()),
                routing_key: Some(routing_key.to_string()),
                message: "Webhook processed successfully".to_string(),
            }))
        }
        Ok(ProcessingOutcome::Ignored { event_type }) => {
            state.metrics.ignored_events_total.inc();
            Ok(Json(WebhookResponse {
                status: "ignored".to_string(),
                event_id: None,
                routing_key: None,
                message: format!("Event '{}' is not handled", event_type),
            }))
        }
        Err(e) => {
            match &e {
                WebhookError::InvalidSignature(_) => state.metrics.signature_failures_total.inc(),
                WebhookError::MalformedPayload(_) => state.metrics.malformed_payloads_total.inc(),
                WebhookError::Publish(_) => state.metrics.publish_failures_total.inc(),
            }
            Err(WebhookHandlerError::ProcessingFailed(e))
        }
    }
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness: the process is up and serving
#[instrument(skip_all)]
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: not ready while publishes are being dropped in degraded mode
/// or after the stage-update consumer has stopped
#[instrument(skip(state))]
async fn handle_readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let consumer = state.consumer.state();
    let ready = !state.bus_status.degraded && consumer != ConsumerState::Stopped;

    let response = ReadinessResponse {
        ready,
        timestamp: Timestamp::now(),
        bus: state.bus_status.clone(),
        consumer,
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// Resolved stage and per-stage records for one user
#[instrument(skip(state))]
async fn get_user_stage(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<StageResponse>, StageQueryError> {
    let user_id = UserId::new(user_id)?;
    let resolved = state.stage_repository.current_stage(&user_id).await?;
    Ok(Json(StageResponse::from(resolved)))
}

// ============================================================================
// Observability Handlers
// ============================================================================

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware with correlation ID tracking
///
/// Reuses a valid inbound `x-correlation-id`, otherwise generates one. The id
/// is stored in request extensions for handlers and echoed on the response.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<CorrelationId>().ok())
        .unwrap_or_default();

    tracing::Span::current().record("correlation_id", correlation_id.as_str().as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.as_str().parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}
