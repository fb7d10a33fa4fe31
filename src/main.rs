mod api;
mod attachment;
mod config;
mod dispatch;
mod error;
mod health;
mod platform;
mod relay;
mod request;
mod voice;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::health::BotStatus;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Secrets usually live in .env
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  API: {}", config.api_base());
    info!("  Bearer auth: {}", config.api.bearer_token.is_some());
    info!("  Transcode voice: {}", config.voice.transcode_ogg);
    info!("  Voice playback: {}", config.voice.playback);
    match config.api.timeout() {
        Some(timeout) => info!("  API timeout: {:?}", timeout),
        None => warn!("No API timeout configured; a stalled request blocks its handler"),
    }

    let status = Arc::new(BotStatus::new());

    if config.health.enabled {
        health::spawn(config.health.port, status.clone()).await?;
    }

    let relay = Arc::new(Relay::new(config.clone())?);

    // Run the Discord bot
    info!("Bot is starting...");
    platform::discord::run(relay, Arc::new(config), status).await?;

    Ok(())
}
