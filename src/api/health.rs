//! Health check endpoint

use axum::routing::get;
use axum::Router;

/// Liveness probe for load balancers and process supervisors
async fn health_check() -> &'static str {
    "ok"
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(health_check))
}
