//! Broker implementations.

pub mod channel;
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use channel::{connect_within, PublishChannel, RecoveringPublisher};
pub use memory::{InMemoryBroker, PublishedMessage};

#[cfg(feature = "amqp")]
pub use amqp::{AmqpConsumer, AmqpPublisher};
