//! Startup wiring: configuration loading and component construction.
//!
//! Everything the binary needs is assembled here so the wiring can be tested
//! without binding a socket.

use kyc_relay_api::{AppState, BusStatus, ConsumerState, ServiceConfig, ServiceMetrics};
use kyc_relay_bus::{
    BusError, BusMode, ExchangeName, InMemoryBroker, MessageConsumer, MessagePublisher,
    NoopPublisher, ProviderType, QueueName,
};
use kyc_relay_core::{
    BusEventRouter, CustomerDirectory, InMemoryCustomerDirectory, InMemoryStageRepository,
    LoggingAccountOpener, ProvisioningClient, ProvisioningError, ResourceId, StageRepository,
    StageStoreError, StageUpdateHandler, UserId, VerificationWebhookProcessor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[cfg(feature = "amqp")]
use kyc_relay_bus::{AmqpConsumer, AmqpPublisher};

#[cfg(test)]
#[path = "bootstrap_tests.rs"]
mod tests;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "KYC_RELAY_CONFIG_FILE";

/// Prefix for configuration overrides, e.g. `KYC_RELAY__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "KYC_RELAY";

/// Failures while bringing up dependencies
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Message bus unavailable: {0}")]
    Bus(#[from] BusError),

    #[error("Stage store unavailable: {0}")]
    Store(#[from] StageStoreError),

    #[error("Invalid name in configuration: {0}")]
    InvalidName(#[from] kyc_relay_bus::ValidationError),

    #[error("Invalid directory entry: {message}")]
    Directory { message: String },

    #[error("Provisioning client misconfigured: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Metrics registry failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("{what} requested but the '{feature}' feature is not compiled in")]
    FeatureDisabled {
        what: &'static str,
        feature: &'static str,
    },
}

// ============================================================================
// Configuration
// ============================================================================

/// Build the service configuration from files and environment.
///
/// Later sources override earlier ones:
/// 1. `/etc/kyc-relay/service.{yaml,toml,json}`
/// 2. `config/service.{yaml,toml,json}`
/// 3. `explicit_path`, which must exist when given
/// 4. `KYC_RELAY__*` environment variables
pub fn load_config(explicit_path: Option<&str>) -> Result<ServiceConfig, config::ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("/etc/kyc-relay/service").required(false))
        .add_source(config::File::with_name("config/service").required(false));

    if let Some(path) = explicit_path.filter(|p| !p.is_empty()) {
        info!(path = %path, "Loading configuration from explicit path");
        builder = builder.add_source(config::File::with_name(path).required(true));
    }

    builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()
}

// ============================================================================
// Message bus
// ============================================================================

/// Handle used to release the broker at shutdown
pub enum BusHandle {
    InMemory(InMemoryBroker),
    #[cfg(feature = "amqp")]
    Amqp {
        publisher: Arc<AmqpPublisher>,
        consumer: AmqpConsumer,
    },
    None,
}

impl BusHandle {
    /// Close every broker connection; a running consumer loop then returns
    pub async fn close(&self) {
        match self {
            Self::InMemory(broker) => broker.close(),
            #[cfg(feature = "amqp")]
            Self::Amqp {
                publisher,
                consumer,
            } => {
                if let Err(e) = consumer.close().await {
                    warn!(error = %e, "Failed to close AMQP consumer cleanly");
                }
                if let Err(e) = publisher.close().await {
                    warn!(error = %e, "Failed to close AMQP publisher cleanly");
                }
            }
            Self::None => {}
        }
    }
}

/// Publisher and consumer selected by `bus.mode`
pub struct BusComponents {
    pub publisher: Arc<dyn MessagePublisher>,
    pub consumer: Option<Arc<dyn MessageConsumer>>,
    pub status: BusStatus,
    pub handle: BusHandle,
}

impl BusComponents {
    fn disabled(degraded: bool) -> Self {
        Self {
            publisher: Arc::new(NoopPublisher::new()),
            consumer: None,
            status: BusStatus {
                provider: ProviderType::Noop,
                degraded,
            },
            handle: BusHandle::None,
        }
    }

    fn in_memory() -> Self {
        let broker = InMemoryBroker::new();
        Self {
            publisher: Arc::new(broker.clone()),
            consumer: Some(Arc::new(broker.clone())),
            status: BusStatus {
                provider: ProviderType::InMemory,
                degraded: false,
            },
            handle: BusHandle::InMemory(broker),
        }
    }
}

/// Wire the bus. With `allow_degraded_start` an unreachable broker falls back
/// to the no-op publisher and readiness reports the service as degraded.
pub async fn build_bus(config: &ServiceConfig) -> Result<BusComponents, StartupError> {
    match config.bus.mode {
        BusMode::InMemory => {
            info!("Using in-memory message bus");
            Ok(BusComponents::in_memory())
        }
        BusMode::Disabled => {
            warn!("Message bus disabled; verification events will be dropped");
            Ok(BusComponents::disabled(false))
        }
        BusMode::Amqp => match connect_amqp(config).await {
            Ok(components) => Ok(components),
            Err(e) if config.bus.allow_degraded_start => {
                error!(
                    error = %e,
                    "AMQP broker unavailable; starting degraded with publishes dropped"
                );
                Ok(BusComponents::disabled(true))
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(feature = "amqp")]
async fn connect_amqp(config: &ServiceConfig) -> Result<BusComponents, StartupError> {
    let publisher = Arc::new(AmqpPublisher::connect(config.bus.amqp.clone()).await?);
    info!("Connected to AMQP broker");

    // The handle keeps a clone so shutdown can close the subscription's connection.
    let consumer = AmqpConsumer::new(config.bus.amqp.clone());

    Ok(BusComponents {
        publisher: publisher.clone(),
        consumer: Some(Arc::new(consumer.clone())),
        status: BusStatus {
            provider: ProviderType::Amqp,
            degraded: false,
        },
        handle: BusHandle::Amqp {
            publisher,
            consumer,
        },
    })
}

#[cfg(not(feature = "amqp"))]
async fn connect_amqp(_config: &ServiceConfig) -> Result<BusComponents, StartupError> {
    Err(StartupError::FeatureDisabled {
        what: "bus.mode = amqp",
        feature: "amqp",
    })
}

// ============================================================================
// Stores
// ============================================================================

/// Stage store and customer directory
pub struct Stores {
    pub stage: Arc<dyn StageRepository>,
    pub directory: Arc<dyn CustomerDirectory>,
}

/// Connect to PostgreSQL when `database.url` is set, otherwise use in-memory
/// stores with the directory seeded from `directory.customers`.
pub async fn build_stores(config: &ServiceConfig) -> Result<Stores, StartupError> {
    match config.database.url.as_deref() {
        Some(url) => connect_postgres(config, url).await,
        None => {
            warn!("No database configured; stage records are kept in memory");
            Ok(Stores {
                stage: Arc::new(InMemoryStageRepository::new()),
                directory: Arc::new(seeded_directory(config)?),
            })
        }
    }
}

fn seeded_directory(config: &ServiceConfig) -> Result<InMemoryCustomerDirectory, StartupError> {
    let directory = InMemoryCustomerDirectory::new();
    for (resource_id, user_id) in &config.directory.customers {
        let invalid = |e: kyc_relay_core::ValidationError| StartupError::Directory {
            message: format!("{} -> {}: {}", resource_id, user_id, e),
        };
        let resource_id = ResourceId::new(resource_id.as_str()).map_err(invalid)?;
        let user_id = UserId::new(user_id.as_str()).map_err(invalid)?;
        directory
            .insert(resource_id, user_id)
            .map_err(|e| StartupError::Directory {
                message: e.to_string(),
            })?;
    }
    info!(customers = directory.len(), "Customer directory seeded from configuration");
    Ok(directory)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &ServiceConfig, url: &str) -> Result<Stores, StartupError> {
    use kyc_relay_core::{PostgresCustomerDirectory, PostgresStageRepository};

    let repository = PostgresStageRepository::connect(url, config.database.max_connections).await?;
    if config.database.run_migrations {
        repository.migrate().await?;
        info!("Database migrations applied");
    }

    let directory = PostgresCustomerDirectory::new(repository.pool().clone());
    Ok(Stores {
        stage: Arc::new(repository),
        directory: Arc::new(directory),
    })
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &ServiceConfig, _url: &str) -> Result<Stores, StartupError> {
    Err(StartupError::FeatureDisabled {
        what: "database.url",
        feature: "postgres",
    })
}

// ============================================================================
// Application
// ============================================================================

/// Fully wired service, ready to serve
pub struct Application {
    pub state: AppState,
    pub bus: BusComponents,
    pub stores: Stores,
    pub provisioning: Arc<ProvisioningClient>,
    exchange: ExchangeName,
    queue: QueueName,
}

impl Application {
    /// Build every component described by `config`
    pub async fn build(config: ServiceConfig) -> Result<Self, StartupError> {
        let exchange = ExchangeName::new(config.bus.exchange.as_str())?;
        let queue = QueueName::new(config.bus.queue.as_str())?;

        let provisioning = Arc::new(ProvisioningClient::new(config.provider.clone())?);
        let bus = build_bus(&config).await?;
        let stores = build_stores(&config).await?;
        let metrics = ServiceMetrics::new()?;

        let router = BusEventRouter::new(bus.publisher.clone(), exchange.clone());
        let processor =
            VerificationWebhookProcessor::new(config.webhook.webhook_secret(), Arc::new(router));

        let state = AppState::new(
            config,
            Arc::new(processor),
            stores.stage.clone(),
            metrics,
            bus.status.clone(),
        );

        Ok(Self {
            state,
            bus,
            stores,
            provisioning,
            exchange,
            queue,
        })
    }

    /// Start the stage-update consumer, if the bus has one.
    ///
    /// The consumer state in [`AppState`] is `Running` while the loop runs and
    /// `Stopped` once it returns, which takes the service out of readiness.
    pub fn spawn_consumer(&self) -> Result<Option<JoinHandle<()>>, StartupError> {
        let Some(consumer) = self.bus.consumer.clone() else {
            info!("No consumer for this bus mode; stage updates are not processed");
            return Ok(None);
        };

        let handlers = StageUpdateHandler::new(
            self.stores.stage.clone(),
            self.stores.directory.clone(),
            Arc::new(LoggingAccountOpener),
        )
        .into_handler_map()?;

        let exchange = self.exchange.clone();
        let queue = self.queue.clone();
        let health = self.state.consumer.clone();
        health.set(ConsumerState::Running);

        Ok(Some(tokio::spawn(async move {
            match consumer
                .consume_with_bindings(&exchange, &queue, handlers)
                .await
            {
                Ok(()) => info!("Stage-update consumer stopped"),
                Err(e) => error!(error = %e, "Stage-update consumer failed"),
            }
            health.set(ConsumerState::Stopped);
        })))
    }

    /// Release the broker and wait up to `timeout` for the consumer to finish
    pub async fn shutdown(&self, consumer: Option<JoinHandle<()>>, timeout: Duration) {
        self.bus.handle.close().await;

        if let Some(mut task) = consumer {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("Consumer did not stop in time; aborting");
                task.abort();
            }
        }
    }
}
