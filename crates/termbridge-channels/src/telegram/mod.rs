//! Telegram - teloxide adapter
//!
//! The bot forwards chat text into sessions and delivers session output as
//! edited live messages.

mod adapter;
mod config;
mod handler;
mod transport;

#[cfg(test)]
mod tests;

pub use adapter::TelegramAdapter;
pub use config::TelegramConfig;
pub use transport::TelegramChat;
