//! Vigil - conversational front end for infrastructure monitoring.
//!
//! Composition root: resolves configuration, initializes tracing, builds the
//! connectors, the result cache, and the conversation engine, starts the
//! background sweeper, and serves the HTTP API.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vigil_api::AppState;
use vigil_chat::{ConversationEngine, InMemorySessionStore};
use vigil_connectors::{Connector, ConnectorManager, ResultCache};
use vigil_core::VigilConfig;

use cli::CliArgs;

/// Periodically drop expired cache entries and idle sessions.
async fn sweep_loop(cache: Arc<ResultCache>, engine: Arc<ConversationEngine>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        let entries = cache.purge_expired();
        let sessions = engine.sweep_expired();
        if entries > 0 || sessions > 0 {
            tracing::debug!(
                cache_entries = entries,
                sessions,
                "Swept expired state"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config. Loaded before tracing so the configured level applies; load
    // failures are logged once the subscriber exists.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match VigilConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (VigilConfig::default(), Some(e)),
    };
    config.apply_env_overrides();
    args.apply_to(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Vigil v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    // Connectors and cache.
    let connectors = Connector::from_config(&config.connectors)?;
    if connectors.is_empty() {
        tracing::warn!("No connectors configured; every question will report no data sources");
    }
    let cache = Arc::new(ResultCache::from_config(&config.cache));
    let manager = Arc::new(ConnectorManager::new(
        connectors,
        Arc::clone(&cache),
        &config.connectors,
    ));
    tracing::info!(
        connectors = ?manager.connector_names(),
        cache_enabled = cache.is_enabled(),
        "Connector manager ready"
    );

    // Conversation engine.
    let store = Arc::new(InMemorySessionStore::new(config.chat.session_idle()));
    let engine = Arc::new(ConversationEngine::from_config(
        &config,
        Arc::clone(&manager),
        store,
    ));
    tracing::info!(
        idle_minutes = config.chat.session_idle_minutes,
        max_history = config.chat.max_history,
        "Conversation engine ready"
    );

    // === Background tasks ===

    let sweep_secs = config.cache.sweep_interval_secs;
    tokio::spawn(sweep_loop(Arc::clone(&cache), Arc::clone(&engine), sweep_secs));

    // === API server ===

    let state = AppState::new(config, engine);
    vigil_api::start_server(state).await?;

    Ok(())
}
