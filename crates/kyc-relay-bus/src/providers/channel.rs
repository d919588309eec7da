//! Publish-side channel recovery shared by network brokers.
//!
//! A [`RecoveringPublisher`] owns one channel. Exchanges are declared lazily,
//! once per channel. When a declare or publish fails the channel is reopened,
//! the declared set is forgotten, and the publish is attempted exactly once
//! more; a second failure goes back to the caller.

use crate::error::BusError;
use crate::message::{ExchangeName, OutboundMessage, RoutingKey};
use async_trait::async_trait;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;

/// Channel operations a broker must provide for publishing
#[async_trait]
pub trait PublishChannel: Send {
    async fn declare_exchange(&mut self, exchange: &ExchangeName) -> Result<(), BusError>;

    async fn publish(
        &mut self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: &OutboundMessage,
    ) -> Result<(), BusError>;

    /// Replace the underlying channel with a fresh one
    async fn reopen(&mut self) -> Result<(), BusError>;
}

/// Publisher over a single channel with one-shot recovery
pub struct RecoveringPublisher<C> {
    channel: C,
    declared: HashSet<String>,
}

impl<C: PublishChannel> RecoveringPublisher<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            declared: HashSet::new(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Reopen the channel; exchanges are re-declared on next use
    pub async fn reopen(&mut self) -> Result<(), BusError> {
        self.channel.reopen().await?;
        self.declared.clear();
        Ok(())
    }

    pub async fn publish(
        &mut self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: &OutboundMessage,
    ) -> Result<(), BusError> {
        match self.publish_once(exchange, routing_key, message).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    error = %first,
                    "Publish failed; reopening channel and retrying once"
                );
                self.reopen().await?;
                self.publish_once(exchange, routing_key, message).await
            }
        }
    }

    async fn publish_once(
        &mut self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: &OutboundMessage,
    ) -> Result<(), BusError> {
        if !self.declared.contains(exchange.as_str()) {
            self.channel.declare_exchange(exchange).await?;
            self.declared.insert(exchange.as_str().to_string());
        }
        self.channel.publish(exchange, routing_key, message).await
    }
}

/// Run a connection attempt, failing with [`BusError::Timeout`] after `timeout`
pub async fn connect_within<F, T, E>(timeout: Duration, connect: F) -> Result<T, BusError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(e)) => Err(BusError::ConnectionFailed {
            message: e.to_string(),
        }),
        Err(_) => Err(BusError::Timeout { duration: timeout }),
    }
}
