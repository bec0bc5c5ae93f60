//! # Syncline Agent
//!
//! Signs in to the API server, keeps the realtime channel open and logs the
//! resulting sync events until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the default search paths
//! syncline
//!
//! # Run with custom config
//! syncline --config /path/to/syncline.toml
//!
//! # Run with environment variables
//! SYNCLINE_SERVER_URL=https://api.example.com SYNCLINE_TOKEN=... syncline
//! ```

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use syncline_agent::{metrics, session, Config, EntityStore, ReconnectPolicy, Session, ENTITY_TYPES};
use syncline_core::{EventBus, ResolverRegistry};
use syncline_transport::{ReqwestClient, ReqwestConfig, WebSocketConfig, WebSocketEventSource};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut path = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                path = Some(PathBuf::from(args.next().context("--config requires a path")?));
            }
            other => bail!("Unknown argument: {}", other),
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let path = config_path()?;
    let config = Config::load(path.as_deref())?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Syncline agent for {}", config.server_url);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {:#}", e);
        }
    }

    let client = Arc::new(
        ReqwestClient::new(ReqwestConfig::default()).context("Failed to build HTTP client")?,
    );
    let registry = Arc::new(ResolverRegistry::new());
    registry.register_all(ENTITY_TYPES, Arc::new(EntityStore::new()));

    let bus = EventBus::new();
    let shutdown = CancellationToken::new();
    let logger = tokio::spawn(session::log_events(bus.clone(), shutdown.clone()));

    let session = Session::login(&config, client, registry, bus).await?;

    match &config.realtime_url {
        Some(url) => {
            let mut ws = WebSocketConfig::new(url.clone());
            if let Some(token) = &config.session.token {
                ws = ws.with_token(token.clone());
            }
            session.spawn_realtime(WebSocketEventSource::new(ws), ReconnectPolicy::default());
        }
        None => tracing::warn!("No realtime_url configured; realtime updates disabled"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    session.logout().await;
    shutdown.cancel();
    if let Err(e) = logger.await {
        tracing::error!("Event logger failed: {}", e);
    }

    Ok(())
}
