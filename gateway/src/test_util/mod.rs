//! Helpers for tests: configs and in-process fake backends.

pub mod mock_ollama;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::gateway::Gateway;

/// Config pointing at `backend_url` with test-friendly timings.
pub fn test_config(backend_url: &str) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ollama_base_url: backend_url.to_string(),
        max_concurrent_requests: 1,
        queue_timeout_seconds: 5,
        worker_poll_interval_ms: 20,
        health_timeout_seconds: 1,
        relay_buffer_chunks: 4,
        log_level: "debug".to_string(),
        ..Config::default()
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_backend(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake backend");
    let addr = listener.local_addr().expect("Fake backend has no address");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{}", addr)
}

/// Start a gateway and its router for `config`.
pub fn start_gateway(config: Config) -> (Arc<Gateway>, Router) {
    let gateway = Gateway::start(config).expect("Failed to start gateway");
    let app = crate::routes::router(gateway.clone());
    (gateway, app)
}
