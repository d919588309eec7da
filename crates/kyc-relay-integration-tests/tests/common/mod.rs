//! Shared fixtures for the end-to-end pipeline tests.
//!
//! A [`Pipeline`] wires the real router, processor, bus router, consumer
//! handler and in-memory stores together over one [`InMemoryBroker`].

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use kyc_relay_api::{create_router, AppState, BusStatus, ServiceConfig, ServiceMetrics};
use kyc_relay_bus::{
    ExchangeName, InMemoryBroker, MessageConsumer, ProviderType, QueueName, RoutingKey,
};
use kyc_relay_core::{
    sign_legacy, sign_sha256, AccountOpener, AccountOpeningError, BusEventRouter,
    CanonicalVerificationEvent, InMemoryCustomerDirectory, InMemoryStageRepository, ResourceId,
    StageRecord, StageRepository, StageUpdateHandler, UserId, VerificationWebhookProcessor,
    WebhookSecret, ROUTING_KEY_TIER_STATUS, ROUTING_KEY_VERIFIED,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;

pub const SECRET: &str = "whsec_pipeline";
pub const EXCHANGE: &str = "customer_events";
pub const QUEUE: &str = "kyc-relay.stage-updates";
pub const RESOURCE: &str = "X-anc_ind_cst";
pub const USER: &str = "user-x";

// ============================================================================
// Account opener double
// ============================================================================

/// Records every account-opening request
#[derive(Clone, Default)]
pub struct RecordingOpener {
    calls: Arc<Mutex<Vec<UserId>>>,
}

impl RecordingOpener {
    pub fn calls(&self) -> Vec<UserId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountOpener for RecordingOpener {
    async fn open_account(
        &self,
        user_id: &UserId,
        _event: &CanonicalVerificationEvent,
    ) -> Result<(), AccountOpeningError> {
        self.calls.lock().unwrap().push(user_id.clone());
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    pub router: Router,
    pub broker: InMemoryBroker,
    pub repository: InMemoryStageRepository,
    pub opener: RecordingOpener,
    pub metrics: Arc<ServiceMetrics>,
    consumer: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Webhook side only; published events stay on the broker
    pub fn new() -> Self {
        let broker = InMemoryBroker::with_publish_log();
        let repository = InMemoryStageRepository::new();
        let metrics = ServiceMetrics::new().unwrap();

        let bus_router = BusEventRouter::new(
            Arc::new(broker.clone()),
            ExchangeName::new(EXCHANGE).unwrap(),
        );
        let processor =
            VerificationWebhookProcessor::new(WebhookSecret::new(SECRET), Arc::new(bus_router));
        let state = AppState::new(
            ServiceConfig::default(),
            Arc::new(processor),
            Arc::new(repository.clone()),
            metrics.clone(),
            BusStatus {
                provider: ProviderType::InMemory,
                degraded: false,
            },
        );

        Self {
            router: create_router(state),
            broker,
            repository,
            opener: RecordingOpener::default(),
            metrics,
            consumer: None,
        }
    }

    /// Webhook side plus a running stage-update consumer that knows
    /// [`RESOURCE`] as [`USER`]
    pub fn with_consumer() -> Self {
        let mut pipeline = Self::new();
        let directory = InMemoryCustomerDirectory::new().with_customer(
            ResourceId::new(RESOURCE).unwrap(),
            UserId::new(USER).unwrap(),
        );
        let handlers = StageUpdateHandler::new(
            Arc::new(pipeline.repository.clone()),
            Arc::new(directory),
            Arc::new(pipeline.opener.clone()),
        )
        .into_handler_map()
        .unwrap();

        let exchange = ExchangeName::new(EXCHANGE).unwrap();
        let queue = QueueName::new(QUEUE).unwrap();

        // Bind up front so nothing published before the task runs is lost.
        for key in [ROUTING_KEY_VERIFIED, ROUTING_KEY_TIER_STATUS] {
            pipeline
                .broker
                .bind_queue(&exchange, &queue, &RoutingKey::new(key).unwrap());
        }

        let broker = pipeline.broker.clone();
        pipeline.consumer = Some(tokio::spawn(async move {
            broker
                .consume_with_bindings(&exchange, &queue, handlers)
                .await
                .unwrap();
        }));
        pipeline
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Poll the stage store until `user` has `count` records or a second passes
    pub async fn wait_for_records(&self, user: &str, count: usize) -> Vec<StageRecord> {
        let user = UserId::new(user).unwrap();
        let mut records = Vec::new();
        for _ in 0..100 {
            records = self.repository.records_for_user(&user).await.unwrap();
            if records.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        records
    }

    /// Close the broker and wait for the consumer loop to return
    pub async fn shutdown(mut self) {
        self.broker.close();
        if let Some(task) = self.consumer.take() {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .expect("consumer did not stop after broker close")
                .unwrap();
        }
    }
}

// ============================================================================
// Request builders
// ============================================================================

pub fn payload(event: &str, attributes: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": event,
        "data": {
            "id": RESOURCE,
            "type": "IndividualCustomer",
            "attributes": attributes
        }
    }))
    .unwrap()
}

pub fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/anchor")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-anchor-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn signed(body: Vec<u8>) -> Request<Body> {
    let signature = sign_sha256(&WebhookSecret::new(SECRET), &body).unwrap();
    webhook_request(body, Some(signature))
}

pub fn signed_legacy(body: Vec<u8>) -> Request<Body> {
    let signature = sign_legacy(&WebhookSecret::new(SECRET), &body).unwrap();
    webhook_request(body, Some(signature))
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
