//! ESP display gateway
//!
//! Usage: `espdisplay [CONFIG_DIR]`. The directory holds `gateway.yaml`,
//! `config.yaml` and `templates.yaml`; it defaults to
//! `$ESPDISPLAY_CONFIG_DIR` or the working directory.

use anyhow::{Context, Result};
use esp_config::GatewaySettings;
use esp_server::Gateway;
use esp_transport::{LocalBus, SharedTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ESPDISPLAY_CONFIG_DIR").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let settings = GatewaySettings::load(&config_dir)
        .with_context(|| format!("failed to load settings from {}", config_dir.display()))?;
    info!(config_dir = %config_dir.display(), "Starting ESP display gateway");

    // TODO: swap in a broker-backed Transport once one is implemented
    let transport: SharedTransport = Arc::new(LocalBus::new());

    let gateway = Gateway::new(settings, transport, None)
        .await
        .context("failed to initialize gateway")?;
    gateway.start(None).await.context("failed to start gateway")?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    gateway.stop();

    Ok(())
}
