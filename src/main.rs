//! # Relay Hub
//!
//! Application entry point that initializes:
//! - Tracing/logging subsystem
//! - Configuration loading
//! - Message store and bus connections
//! - Pipeline workers
//! - HTTP/WebSocket server

use anyhow::Result;
use tracing::info;

use relay_hub::config::Settings;
use relay_hub::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    relay_hub::telemetry::init_tracing();

    info!("Starting Relay Hub...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        store = ?settings.store.backend,
        bus = ?settings.bus.backend,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
