//! Inference gateway core.
//!
//! This module provides:
//! - Priority classification of proxied requests
//! - The admission queue shared by ingress handlers and workers
//! - A fixed pool of dispatch workers forwarding to the backend
//! - The streaming relay carrying backend bytes back to callers

pub mod classifier;
pub mod pool;
pub mod queue;
pub mod relay;
pub mod transform;
mod worker;

pub use classifier::classify;
pub use pool::WorkerPool;
pub use queue::{AdmissionQueue, Outcome, PendingRequest, ProxiedCall, Responder};
pub use relay::{RelayOutcome, UpstreamResponse};
pub use transform::{RequestTransform, TransformError};
pub use worker::WorkerState;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use inference_gateway_common::MetricsSnapshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::error::{BootError, GatewayError};
use worker::WorkerContext;

/// The gateway: owns the admission queue, the worker pool and the backend client.
///
/// Built once at startup and shared with the HTTP layer.
pub struct Gateway {
    config: Config,
    queue: Arc<AdmissionQueue>,
    pool: WorkerPool,
    backend: Arc<BackendClient>,
}

impl Gateway {
    /// Build the gateway and start its workers.
    pub fn start(config: Config) -> Result<Arc<Self>, BootError> {
        Self::start_with_transform(config, None)
    }

    /// Build the gateway with a request transform applied before forwarding.
    pub fn start_with_transform(
        config: Config,
        transform: Option<Arc<dyn RequestTransform>>,
    ) -> Result<Arc<Self>, BootError> {
        let backend = Arc::new(BackendClient::new(&config.ollama_base_url)?);
        let queue = Arc::new(AdmissionQueue::new(config.max_queue_depth));

        let ctx = Arc::new(WorkerContext {
            queue: queue.clone(),
            backend: backend.clone(),
            transform,
            poll_interval: config.worker_poll_interval(),
            relay_buffer: config.relay_buffer_chunks,
            busy: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        });
        let pool = WorkerPool::start(config.max_concurrent_requests, ctx)?;

        tracing::info!(
            backend = %backend.base_url(),
            max_workers = config.max_concurrent_requests,
            queue_timeout_secs = config.queue_timeout_seconds,
            max_queue_depth = ?config.max_queue_depth,
            "Gateway started"
        );

        Ok(Arc::new(Self {
            config,
            queue,
            pool,
            backend,
        }))
    }

    /// Admit a call and wait for its response to start.
    ///
    /// The wait is bounded by `queue_timeout`. On timeout, or when the
    /// returned future is dropped, the request is cancelled: a queued entry
    /// is discarded by the worker that pops it and an in-flight backend call
    /// is closed. On success the returned guard must travel with the
    /// response body so a disconnecting caller cancels the stream.
    pub async fn submit(&self, call: ProxiedCall) -> Result<(UpstreamResponse, DropGuard), GatewayError> {
        let tier = classify(&call.path, call.json_body().as_ref());
        let (request, rx) = PendingRequest::new(tier, call);
        let id = request.id;
        let guard = request.cancel.clone().drop_guard();

        tracing::debug!(request_id = %id, tier = %tier, path = %request.call.path, "Admitting request");
        self.queue.enqueue(request)?;

        let timeout = self.config.queue_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(upstream))) => Ok((upstream, guard)),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(GatewayError::Internal(
                "response channel closed without an answer".to_string(),
            )),
            Err(_) => {
                tracing::warn!(request_id = %id, timeout_secs = timeout.as_secs(), "Request timed out in queue");
                Err(GatewayError::AdmissionTimeout(timeout))
            }
        }
    }

    /// Counters for `/metrics`. No backend call.
    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_length: self.queue.len(),
            active_workers: self.pool.active_count(),
            max_workers: self.pool.max_concurrency(),
            busy_workers: self.pool.busy_count(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    /// Stop admitting, answer everything still queued, and stop the workers.
    pub async fn shutdown(&self) {
        let drained = self.queue.close();
        if !drained.is_empty() {
            tracing::info!("Answering {} queued requests with shutdown", drained.len());
        }
        for mut request in drained {
            request.responder.resolve(Err(GatewayError::ShuttingDown));
        }

        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use std::time::Duration;

    fn config(max_workers: usize) -> Config {
        Config {
            ollama_base_url: "http://127.0.0.1:1".to_string(),
            max_concurrent_requests: max_workers,
            queue_timeout_seconds: 1,
            worker_poll_interval_ms: 20,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_metrics_reflect_pool() {
        let gateway = Gateway::start(config(2)).unwrap();
        let metrics = gateway.metrics();

        assert_eq!(metrics.queue_length, 0);
        assert_eq!(metrics.active_workers, 2);
        assert_eq!(metrics.max_workers, 2);
        assert_eq!(metrics.busy_workers, 0);

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_workers_fails_boot() {
        assert!(matches!(Gateway::start(config(0)), Err(BootError::NoWorkers)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let gateway = Gateway::start(config(1)).unwrap();
        let call = ProxiedCall::new(Method::GET, "/api/tags", HeaderMap::new(), None);

        let err = gateway.submit(call).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnreachable(_)));

        gateway.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let gateway = Gateway::start(config(1)).unwrap();
        gateway.shutdown().await;

        let call = ProxiedCall::new(Method::GET, "/api/tags", HeaderMap::new(), None);
        let result = tokio::time::timeout(Duration::from_secs(1), gateway.submit(call)).await;
        assert!(matches!(result, Ok(Err(GatewayError::ShuttingDown))));
        assert_eq!(gateway.metrics().active_workers, 0);
    }
}
