//! Termbridge - SSH terminal sessions over chat and WebSocket
//!
//! CLI entry point for the Termbridge server.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod server;
mod websocket;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = server::load_config()?;

    // File output is optional; the guard flushes it on exit
    let (file_layer, _guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "termbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "termbridge=info,termbridge_core=info,termbridge_channels=info,tower_http=info"
                        .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    let cli = cli::Cli::parse();
    cli::run(cli, config).await
}
