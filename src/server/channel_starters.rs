//! Channel adapter startup functions

use super::config::AppConfig;
use std::sync::Arc;
use termbridge_channels::{CommandContext, TelegramAdapter, TelegramConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Start the Telegram adapter
pub fn start_telegram_adapter(
    config: &AppConfig,
    context: Arc<CommandContext>,
    shutdown: &CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if !config.telegram.enabled {
        debug!("Telegram disabled by configuration");
        return None;
    }

    let telegram_config = match config.telegram.bot_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => TelegramConfig::new(token),
        _ => match TelegramConfig::from_env() {
            Ok(telegram_config) => telegram_config,
            Err(e) => {
                warn!("Telegram adapter not started: {}", e);
                return None;
            }
        },
    };
    let telegram_config = if config.telegram.allowed_users.is_empty() {
        telegram_config
    } else {
        telegram_config.with_allowed_users(config.telegram.allowed_users.clone())
    };
    if telegram_config.allowed_users.is_empty() {
        warn!("Telegram allow-list is empty; any user can open sessions");
    }

    let telegram_adapter = Arc::new(TelegramAdapter::new(telegram_config));
    let telegram_shutdown = shutdown.child_token();
    let handle = tokio::spawn(async move {
        if let Err(e) = telegram_adapter.run(context, telegram_shutdown).await {
            error!("Telegram adapter error: {}", e);
        }
    });

    info!("Telegram adapter started");
    Some(handle)
}
