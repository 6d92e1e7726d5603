//! HTTP API for Termbridge
//!
//! - `/health`: liveness probe

mod health;

pub use health::health_routes;
