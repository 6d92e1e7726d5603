//! Error types for termbridge-channels

use thiserror::Error;

/// Channel error type
#[derive(Debug, Error)]
pub enum Error {
    /// Telegram error
    #[error("telegram error: {0}")]
    Telegram(String),

    /// Missing or malformed channel configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Session engine error
    #[error(transparent)]
    Session(#[from] termbridge_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
