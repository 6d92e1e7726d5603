//! Telegram message handler and bot runner

use super::adapter::TelegramAdapter;
use super::transport::TelegramChat;
use crate::commands::{CommandContext, Incoming};
use crate::error::Result;
use std::sync::Arc;
use teloxide::{prelude::*, types::Message as TelegramMessage};
use termbridge_core::Sink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

impl TelegramAdapter {
    /// Run the bot until `shutdown` is cancelled.
    ///
    /// Updates are dispatched per chat, so input from one chat reaches its
    /// session in the order it was typed.
    #[instrument(skip_all)]
    pub async fn run(
        self: Arc<Self>,
        context: Arc<CommandContext>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("Starting Telegram bot");

        let bot = self.bot.clone();
        let adapter = self.clone();

        let handler = Update::filter_message().endpoint(move |bot: Bot, msg: TelegramMessage| {
            let adapter = adapter.clone();
            let context = context.clone();
            async move { Self::handle_message(adapter, context, bot, msg).await }
        });

        let mut dispatcher = Dispatcher::builder(bot, handler).build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            match token.shutdown() {
                Ok(stopped) => stopped.await,
                Err(e) => debug!(error = ?e, "Telegram dispatcher was not running"),
            }
        });

        dispatcher.dispatch().await;
        info!("Telegram bot stopped");
        Ok(())
    }

    /// Handle an incoming message
    pub(crate) async fn handle_message(
        adapter: Arc<Self>,
        context: Arc<CommandContext>,
        bot: Bot,
        msg: TelegramMessage,
    ) -> ResponseResult<()> {
        let Some(text) = msg.text() else {
            return Ok(());
        };
        let Some(user) = msg.from.as_ref() else {
            return Ok(());
        };
        let user_id = user.id.0 as i64;
        let chat_id = msg.chat.id;

        if !adapter.is_user_allowed(user_id) {
            debug!(user_id = %user_id, "User not in allowlist");
            if text.starts_with("/start") {
                bot.send_message(chat_id, "Unauthorized.").await?;
            }
            return Ok(());
        }

        let incoming = Incoming::parse(text);
        // Message text may be a password; only its length is logged
        info!(
            chat_id = %chat_id,
            user_id = %user_id,
            kind = incoming.kind(),
            len = text.len(),
            "Received message"
        );

        let sink = Sink::Chat(Arc::new(TelegramChat::new(bot.clone(), chat_id)));
        if let Some(reply) = context.handle(user_id, chat_id.0, incoming, sink).await {
            if let Err(e) = bot.send_message(chat_id, reply).await {
                warn!(chat_id = %chat_id, error = %e, "Failed to send reply");
            }
        }
        Ok(())
    }
}
