//! Termbridge Channels - chat front-ends
//!
//! This crate connects chat platforms to the session engine:
//! - Telegram (via teloxide): the chat transport and the bot command surface

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod error;
pub mod telegram;

pub use commands::{BotCommand, BotSettings, CommandContext, Incoming};
pub use error::{Error, Result};

// Re-export Telegram adapter
pub use telegram::{TelegramAdapter, TelegramChat, TelegramConfig};
