//! Chat transport backed by the Telegram Bot API

use async_trait::async_trait;
use teloxide::{
    payloads::SendDocumentSetters,
    prelude::*,
    types::{ChatId, InputFile, MessageId as TelegramMessageId},
    ApiError, RequestError,
};
use termbridge_core::{ChatTransport, MessageId, TransportError};

/// Delivers session output to one Telegram chat
#[derive(Clone)]
pub struct TelegramChat {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramChat {
    /// Transport for `chat_id`
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

/// "message is not modified" is the one API error the pump treats as success
pub(crate) fn map_request_error(error: RequestError) -> TransportError {
    match error {
        RequestError::Api(ApiError::MessageNotModified) => TransportError::NotModified,
        other => TransportError::Failed(other.to_string()),
    }
}

#[async_trait]
impl ChatTransport for TelegramChat {
    async fn send_message(&self, text: &str) -> Result<MessageId, TransportError> {
        let sent = self
            .bot
            .send_message(self.chat_id, text)
            .await
            .map_err(map_request_error)?;
        Ok(i64::from(sent.id.0))
    }

    async fn edit_message(&self, id: MessageId, text: &str) -> Result<(), TransportError> {
        let id = i32::try_from(id)
            .map_err(|_| TransportError::Failed(format!("message id {} out of range", id)))?;
        self.bot
            .edit_message_text(self.chat_id, TelegramMessageId(id), text)
            .await
            .map_err(map_request_error)?;
        Ok(())
    }

    async fn send_file(
        &self,
        file_name: &str,
        data: Vec<u8>,
        caption: &str,
    ) -> Result<(), TransportError> {
        let file = InputFile::memory(data).file_name(file_name.to_string());
        let mut request = self.bot.send_document(self.chat_id, file);
        if !caption.is_empty() {
            request = request.caption(caption);
        }
        request.await.map_err(map_request_error)?;
        Ok(())
    }
}
