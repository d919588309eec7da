//! # KYC Relay Service
//!
//! Binary entry point for the KYC Relay verification pipeline.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Wires the message bus, stage store and customer directory
//! - Runs the stage-update consumer alongside the HTTP server
//!
//! Exit codes: 1 bind failure, 2 server failure, 3 configuration error,
//! 4 dependency unavailable at startup.

mod bootstrap;

use bootstrap::{load_config, Application, CONFIG_FILE_ENV};
use kyc_relay_api::{shutdown_signal, start_server, LoggingConfig, ServiceError};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes first so its logging section can shape the subscriber.
    let explicit_path = std::env::var(CONFIG_FILE_ENV).ok();
    let config = load_config(explicit_path.as_deref());

    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_tracing(&logging);

    info!("Starting KYC Relay service");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Could not load service configuration; aborting");
            std::process::exit(3);
        }
    };

    if let Err(e) = config.validate() {
        error!(error = %e, "Service configuration is invalid; aborting");
        std::process::exit(3);
    }

    let server_config = config.server.clone();
    let shutdown_timeout = Duration::from_secs(server_config.shutdown_timeout_seconds);

    let app = match Application::build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to initialise dependencies; aborting");
            std::process::exit(4);
        }
    };

    let consumer = match app.spawn_consumer() {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, "Failed to start stage-update consumer; aborting");
            std::process::exit(4);
        }
    };

    info!(
        host = %server_config.host,
        port = server_config.port,
        bus = ?app.bus.status.provider,
        degraded = app.bus.status.degraded,
        "Starting HTTP server"
    );

    let result = start_server(&server_config, app.state.clone(), shutdown_signal()).await;

    app.shutdown(consumer, shutdown_timeout).await;

    if let Err(e) = result {
        error!("Server stopped with error: {}", e);

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
            ServiceError::Configuration(_) => 3,
        };

        std::process::exit(exit_code);
    }

    info!("KYC Relay service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
