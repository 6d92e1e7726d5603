//! WebSocket module for Termbridge
//!
//! Provides browser terminal endpoints:
//! - /ws/:token - Attach to a running session
//! - /ws/local - Local shell owned by the socket

pub mod protocol;
pub mod terminal;

pub use terminal::{attach_handler, local_handler, WebState};

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_router() -> Router {
    Router::new()
        .route("/ws/local", get(local_handler))
        .route("/ws/:token", get(attach_handler))
}
