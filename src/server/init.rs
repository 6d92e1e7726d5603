//! Server initialization and main run loop

use super::channel_starters::start_telegram_adapter;
use super::config::AppConfig;
use super::shutdown::wait_for_shutdown_signal;
use super::stores::open_store;
use crate::websocket::{websocket_router, WebState};
use anyhow::{Context, Result};
use axum::{Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use termbridge_channels::CommandContext;
use termbridge_core::{ConnectionCatalog, CredentialStore, SessionRegistry};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Run the server
pub async fn run(config: AppConfig) -> Result<()> {
    info!("Starting Termbridge v{}", env!("CARGO_PKG_VERSION"));

    let store = match open_store(&config).await {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("Saved connections unavailable: {:#}", e);
            None
        }
    };

    let engine = config.engine_config();
    let idle_timeout = engine.idle_timeout;
    let registry = SessionRegistry::new(
        engine,
        store.clone().map(|s| s as Arc<dyn CredentialStore>),
    );

    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(config.sweep_interval(), idle_timeout, shutdown.child_token());

    let mut channel_handles = Vec::new();
    let context = Arc::new(CommandContext::new(
        registry.clone(),
        store.map(|s| s as Arc<dyn ConnectionCatalog>),
        config.bot_settings(),
    ));
    if let Some(handle) = start_telegram_adapter(&config, context, &shutdown) {
        channel_handles.push(handle);
    }

    let mut app = Router::new().merge(crate::api::health_routes());
    if config.web.enabled {
        let web_state = WebState {
            registry: registry.clone(),
            allow_local_shell: config.web.allow_local_shell,
            shell: config.web.shell.clone(),
            shutdown: shutdown.clone(),
        };
        app = app.merge(websocket_router().layer(Extension(web_state)));
        info!(
            local_shell = config.web.allow_local_shell,
            "WebSocket terminal enabled"
        );
    }
    let app = app.layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("HTTP server listening on http://{}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("HTTP server error")?;
    shutdown.cancel();

    info!("Waiting for channel adapters to finish...");
    let adapter_timeout = Duration::from_secs(5);
    for handle in channel_handles {
        match tokio::time::timeout(adapter_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Channel adapter task error: {}", e),
            Err(_) => warn!("Channel adapter shutdown timeout, aborting"),
        }
    }
    let _ = sweeper.await;

    let closed = registry.shutdown_all().await;
    info!(closed, "Termbridge shutdown complete");
    Ok(())
}
