//! toolbridge server.
//!
//! Serves the MCP tool surface on `/mcp` and accepts the local PC agent on
//! `/bridge`.

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use toolbridge_core::BridgeGateway;
use toolbridge_session::SessionRegistry;
use toolbridge_tools::default_registry;
use toolbridge_transport::{AppState, McpHandler, create_router};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Cli::parse().into_settings()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log)))
        .init();

    if settings.auth.token.is_none() {
        tracing::warn!("No auth token configured; /mcp is unauthenticated");
    }
    if settings.auth.bridge_key.is_none() {
        tracing::warn!("No bridge key configured; local PC agents will be rejected");
    }

    let gateway = Arc::new(BridgeGateway::new(settings.bridge_timeout));
    let tools = default_registry(&settings.tools, Arc::clone(&gateway))
        .context("failed to build tool registry")?;
    let sessions = SessionRegistry::new();

    let state = AppState {
        sessions: sessions.clone(),
        mcp: Arc::new(McpHandler::new(Arc::new(tools))),
        gateway,
        auth: Arc::new(settings.auth),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    tracing::info!("Server listening on http://{}", settings.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let closed = sessions.close_all();
    tracing::info!(closed, "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
