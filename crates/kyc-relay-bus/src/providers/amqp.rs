//! AMQP 0.9.1 publisher and consumer built on lapin.

use crate::consumer::{dispatch, Disposition, HandlerMap, MessageConsumer};
use crate::error::BusError;
use crate::message::{Delivery, ExchangeName, OutboundMessage, QueueName, RoutingKey};
use crate::provider::{AmqpConfig, ProviderType};
use crate::providers::channel::{connect_within, PublishChannel, RecoveringPublisher};
use crate::publisher::MessagePublisher;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

#[cfg(test)]
#[path = "amqp_tests.rs"]
mod tests;

/// Persistent delivery mode in AMQP basic properties
const DELIVERY_MODE_PERSISTENT: u8 = 2;

// ============================================================================
// Connection helpers
// ============================================================================

async fn dial(config: &AmqpConfig) -> Result<Connection, BusError> {
    connect_within(
        config.dial_timeout(),
        Connection::connect(&config.url, ConnectionProperties::default()),
    )
    .await
}

async fn close_connection(connection: &Connection) -> Result<(), BusError> {
    connection
        .close(200, "shutdown")
        .await
        .map_err(|e| BusError::ConnectionFailed {
            message: e.to_string(),
        })
}

async fn open_channel(connection: &Connection) -> Result<Channel, BusError> {
    connection
        .create_channel()
        .await
        .map_err(|e| BusError::ChannelUnavailable {
            message: e.to_string(),
        })
}

async fn declare_exchange(channel: &Channel, exchange: &ExchangeName) -> Result<(), BusError> {
    channel
        .exchange_declare(
            exchange.as_str(),
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BusError::DeclareFailed {
            exchange: exchange.to_string(),
            message: e.to_string(),
        })
}

fn properties_for(message: &OutboundMessage) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(message.content_type.clone().into())
        .with_timestamp(message.timestamp.timestamp().max(0) as u64)
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_message_id(message.message_id.as_str().to_string().into())
}

fn to_delivery(delivery: &lapin::message::Delivery) -> Delivery {
    let properties = &delivery.properties;
    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        body: Bytes::copy_from_slice(&delivery.data),
        content_type: properties.content_type().as_ref().map(|v| v.as_str().to_string()),
        timestamp: (*properties.timestamp())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0)),
        message_id: properties.message_id().as_ref().map(|v| v.as_str().to_string()),
        redelivered: delivery.redelivered,
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Connection plus the channel currently used for publishing
struct LapinChannel {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl PublishChannel for LapinChannel {
    async fn declare_exchange(&mut self, exchange: &ExchangeName) -> Result<(), BusError> {
        declare_exchange(&self.channel, exchange).await
    }

    async fn publish(
        &mut self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: &OutboundMessage,
    ) -> Result<(), BusError> {
        let publish_failed = |e: lapin::Error| BusError::PublishFailed {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            message: e.to_string(),
        };

        self.channel
            .basic_publish(
                exchange.as_str(),
                routing_key.as_str(),
                BasicPublishOptions::default(),
                &message.body,
                properties_for(message),
            )
            .await
            .map_err(&publish_failed)?
            .await
            .map_err(&publish_failed)?;

        Ok(())
    }

    async fn reopen(&mut self) -> Result<(), BusError> {
        self.channel = open_channel(&self.connection).await?;
        Ok(())
    }
}

/// Publisher holding one connection and one channel.
///
/// Publishes are serialized through a lock. When a publish fails the channel
/// is reopened over the same connection and the publish is retried once.
pub struct AmqpPublisher {
    config: AmqpConfig,
    state: Mutex<RecoveringPublisher<LapinChannel>>,
}

impl AmqpPublisher {
    /// Dial the broker and open a channel
    #[instrument(skip(config))]
    pub async fn connect(config: AmqpConfig) -> Result<Self, BusError> {
        let connection = dial(&config).await?;
        let channel = open_channel(&connection).await?;
        info!("AMQP publisher connected");

        Ok(Self {
            config,
            state: Mutex::new(RecoveringPublisher::new(LapinChannel {
                connection,
                channel,
            })),
        })
    }

    /// Reopen the publishing channel over the existing connection
    pub async fn reconnect(&self) -> Result<(), BusError> {
        self.state.lock().await.reopen().await
    }

    pub fn config(&self) -> &AmqpConfig {
        &self.config
    }

    /// Close the connection. Later publishes fail.
    pub async fn close(&self) -> Result<(), BusError> {
        let state = self.state.lock().await;
        close_connection(&state.channel().connection).await
    }
}

#[async_trait]
impl MessagePublisher for AmqpPublisher {
    async fn publish(
        &self,
        exchange: &ExchangeName,
        routing_key: &RoutingKey,
        message: OutboundMessage,
    ) -> Result<(), BusError> {
        self.state
            .lock()
            .await
            .publish(exchange, routing_key, &message)
            .await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Amqp
    }
}

// ============================================================================
// Consumer
// ============================================================================

/// Consumer that dials its own connection per subscription.
///
/// Clones share the live connection, so [`close`](Self::close) on any clone
/// ends a running subscription.
#[derive(Clone)]
pub struct AmqpConsumer {
    config: AmqpConfig,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl AmqpConsumer {
    pub fn new(config: AmqpConfig) -> Self {
        Self {
            config,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Close the subscription's connection, if one is open. The delivery
    /// stream then ends and `consume_with_bindings` returns.
    pub async fn close(&self) -> Result<(), BusError> {
        match self.connection.lock().await.take() {
            Some(connection) => close_connection(&connection).await,
            None => Ok(()),
        }
    }

    async fn setup(
        &self,
        channel: &Channel,
        exchange: &ExchangeName,
        queue: &QueueName,
        handlers: &HandlerMap,
    ) -> Result<(), BusError> {
        let queue_failed = |e: lapin::Error| BusError::QueueSetupFailed {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        declare_exchange(channel, exchange).await?;

        channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(&queue_failed)?;

        for key in handlers.keys() {
            channel
                .queue_bind(
                    queue.as_str(),
                    exchange.as_str(),
                    key.as_str(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(&queue_failed)?;
        }

        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(&queue_failed)?;

        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for AmqpConsumer {
    #[instrument(skip(self, handlers), fields(exchange = %exchange, queue = %queue))]
    async fn consume_with_bindings(
        &self,
        exchange: &ExchangeName,
        queue: &QueueName,
        handlers: HandlerMap,
    ) -> Result<(), BusError> {
        let connection = dial(&self.config).await?;
        let channel = open_channel(&connection).await?;
        self.setup(&channel, exchange, queue, &handlers).await?;
        *self.connection.lock().await = Some(connection);

        let mut deliveries = channel
            .basic_consume(
                queue.as_str(),
                &self.config.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::QueueSetupFailed {
                queue: queue.to_string(),
                message: e.to_string(),
            })?;

        info!(bindings = handlers.len(), "AMQP consumer started");

        while let Some(next) = deliveries.next().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(error = %e, "Delivery stream failed");
                    return Err(BusError::SubscriptionEnded {
                        queue: queue.to_string(),
                        message: e.to_string(),
                    });
                }
            };

            let message = to_delivery(&delivery);
            let outcome = match dispatch(&handlers, &message).await {
                Disposition::Ack | Disposition::Drop => {
                    delivery.ack(BasicAckOptions::default()).await
                }
                Disposition::Requeue => {
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        })
                        .await
                }
            };

            if let Err(e) = outcome {
                return Err(BusError::AckFailed {
                    delivery_tag: message.delivery_tag,
                    message: e.to_string(),
                });
            }
        }

        info!("Delivery stream closed; consumer stopping");
        Ok(())
    }
}
