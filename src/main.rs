//! Stagepass - edge server for the event ticketing frontend

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagepass::{
    api::{self, AppState},
    auth::TokenValidator,
    config::Config,
    services::RemoteLogger,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stagepass=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stagepass edge server...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    config.validate()?;
    tracing::info!("Configuration loaded");

    let remote_log = RemoteLogger::new(&config.logging);
    if remote_log.is_enabled() {
        tracing::info!("Remote logging enabled");
    }

    // Token validity answers are shared by every request
    let validator = Arc::new(TokenValidator::with_ttl(config.auth.token_cache_ttl()));
    tracing::info!(
        ttl_seconds = config.auth.token_cache_ttl_seconds,
        "Token validator initialized"
    );

    let state = AppState::from_config(&config, validator)?;

    if !config.site.dir.join("index.html").exists() {
        tracing::warn!(
            "No index.html in site directory '{}'",
            config.site.dir.display()
        );
    }

    // Build router
    let app = api::build_router(state, &config.site.dir);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);
    remote_log.info("edge", format!("Edge server listening on {}", addr));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
