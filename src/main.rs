//! relaywatch - Upstream Health Monitoring Engine
//!
//! Probes every configured reverse-proxy upstream on a fixed interval,
//! records health history, and dispatches webhook notifications on
//! state transitions.

mod config;
mod db;
mod watchdog;

use config::ServerConfig;
use db::Store;
use watchdog::Watchdog;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("relaywatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting relaywatch...");
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start the watchdog
    let watchdog = Arc::new(Watchdog::new(store));
    watchdog.start();

    // Run until the process is told to stop
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    Ok(())
}
