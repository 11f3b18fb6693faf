//! modeld daemon entry point.

use std::sync::Arc;

use tracing::{error, info};

use modeld::config::EnvConfig;
use modeld::controller::ArtifactRuntime;
use modeld::telemetry::init_logging;
use modeld::Registry;

#[tokio::main]
async fn main() {
    let config = EnvConfig::from_env();

    if let Err(e) = init_logging(&config.log) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let exit_on_error = config.registry.exit_on_error;
    let registry = Registry::new(config.registry, Arc::new(ArtifactRuntime::new()));

    match registry.start().await {
        Ok(state) => info!(state = ?state, "startup complete"),
        Err(e) => {
            error!(error = %e, "startup failed");
            if exit_on_error {
                std::process::exit(1);
            }
        }
    }

    let (producer, consumer) = registry.spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for shutdown signal");
    }
    info!("shutting down");

    producer.abort();
    consumer.abort();
}
