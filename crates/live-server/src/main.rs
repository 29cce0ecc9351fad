//! # Live Server
//!
//! Realtime channel server: WebSocket subscribe/publish through channel
//! handlers, plus an HTTP API for per-channel configuration.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! live
//!
//! # Run with environment variables
//! LIVE_PORT=8080 LIVE_HOST=0.0.0.0 LIVE_SECRET_KEY=<base64 key> live
//! ```

mod api;
mod config;
mod handlers;
mod identity;
mod metrics;
mod remote;
mod state;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live=debug,tenvis_live=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Live server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
