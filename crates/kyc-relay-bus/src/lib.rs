//! # KYC Relay Bus
//!
//! Topic-exchange message bus runtime used by the verification pipeline.
//!
//! This library provides:
//! - Provider-agnostic publish and consume operations
//! - Durable topic exchanges with routing-key bindings
//! - Manual acknowledgement with negative-acknowledge-and-requeue
//! - An in-memory broker for tests and local development
//! - A RabbitMQ (AMQP 0.9.1) broker behind the `amqp` feature
//! - A no-op publisher for deployments where the bus is intentionally absent
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all bus operations
//! - [`message`] - Names, outbound messages and received deliveries
//! - [`publisher`] - Publisher trait and the no-op implementation
//! - [`consumer`] - Consumer trait, handler trait and delivery dispatch
//! - [`provider`] - Provider types and configuration
//! - [`providers`] - Concrete broker implementations

pub mod consumer;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod publisher;

// Re-export commonly used types at crate root for convenience
pub use consumer::{dispatch, Disposition, HandlerMap, MessageConsumer, MessageHandler};
pub use error::{BusError, ValidationError};
pub use message::{Delivery, ExchangeName, MessageId, OutboundMessage, QueueName, RoutingKey};
pub use provider::{AmqpConfig, BusConfig, BusMode, ProviderType};
pub use providers::{
    connect_within, InMemoryBroker, PublishChannel, PublishedMessage, RecoveringPublisher,
};
pub use publisher::{publish_json, MessagePublisher, NoopPublisher};

#[cfg(feature = "amqp")]
pub use providers::{AmqpConsumer, AmqpPublisher};
