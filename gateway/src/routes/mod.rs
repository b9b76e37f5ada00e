//! HTTP surface of the gateway.

pub mod health;
pub mod proxy;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;
use crate::logging::request_logger;

/// Largest request body accepted for proxying (images in multimodal prompts).
const MAX_REQUEST_BODY: usize = 64 * 1024 * 1024;

/// Build the gateway router.
///
/// `/health` and `/metrics` are served locally; every other path and
/// method is proxied through the admission queue.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .fallback(proxy::proxy)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .layer(middleware::from_fn(request_logger))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}
