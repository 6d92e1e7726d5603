//! Server module for Termbridge
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `stores`: Connection store initialization
//! - `channel_starters`: Chat front-end startup
//! - `init`: Server initialization and run loop

mod channel_starters;
pub mod config;
mod init;
mod loader;
mod shutdown;
mod stores;

// Re-export public API
pub use init::run;
pub use loader::load_config;
pub use stores::open_store;
