//! Dispatch workers.
//!
//! A worker loops forever: it takes the most urgent queued request, forwards
//! it to the backend and pumps the streamed reply to the caller before it
//! looks at the queue again. Only shutdown (the pool's token, or the queue
//! closing) stops it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::{AdmissionQueue, PendingRequest, ProxiedCall, Responder};
use super::relay::{self, RelayOutcome, UpstreamResponse};
use super::transform::{self, RequestTransform};
use crate::backend::BackendClient;
use crate::error::GatewayError;

/// Everything a worker needs, shared by the whole pool.
pub(crate) struct WorkerContext {
    pub queue: Arc<AdmissionQueue>,
    pub backend: Arc<BackendClient>,
    pub transform: Option<Arc<dyn RequestTransform>>,
    pub poll_interval: Duration,
    pub relay_buffer: usize,
    /// Workers currently in the dispatched state.
    pub busy: AtomicUsize,
    pub shutdown: CancellationToken,
}

/// Worker lifecycle states, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Dispatched,
    Stopped,
}

/// Marks a worker as dispatched for as long as it lives.
struct BusyGuard<'a>(&'a AtomicUsize);

impl<'a> BusyGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Worker main loop. Returns only on shutdown.
pub(crate) async fn run(worker_id: usize, ctx: Arc<WorkerContext>) {
    tracing::info!(worker = worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            next = ctx.queue.dequeue(ctx.poll_interval) => next,
        };

        match next {
            Some(request) => {
                tracing::trace!(worker = worker_id, state = ?WorkerState::Dispatched);
                process(worker_id, &ctx, request).await;
                tracing::trace!(worker = worker_id, state = ?WorkerState::Idle);
            }
            None if ctx.shutdown.is_cancelled() || ctx.queue.is_closed() => break,
            None => continue,
        }
    }

    tracing::info!(worker = worker_id, state = ?WorkerState::Stopped, "Worker stopped");
}

/// Drive one request to completion. A panic during dispatch is contained
/// here and answered with a 500.
async fn process(worker_id: usize, ctx: &WorkerContext, request: PendingRequest) {
    let waited = request.waited();
    let PendingRequest {
        id,
        tier,
        call,
        cancel,
        mut responder,
        ..
    } = request;

    if cancel.is_cancelled() || responder.is_closed() {
        tracing::debug!(
            request_id = %id,
            path = %call.path,
            "Discarding request abandoned by its caller"
        );
        return;
    }

    let _busy = BusyGuard::enter(&ctx.busy);
    tracing::info!(
        request_id = %id,
        worker = worker_id,
        tier = %tier,
        method = %call.method,
        path = %call.path,
        wait_ms = %waited.as_millis(),
        "Dispatching request"
    );

    let result = AssertUnwindSafe(dispatch(ctx, id, call, &cancel, &mut responder))
        .catch_unwind()
        .await;

    if let Err(panic) = result {
        let message = panic_message(&*panic);
        tracing::error!(request_id = %id, worker = worker_id, "Worker panicked while dispatching: {}", message);
        responder.resolve(Err(GatewayError::Internal(message)));
    }
}

async fn dispatch(
    ctx: &WorkerContext,
    id: Uuid,
    mut call: ProxiedCall,
    cancel: &CancellationToken,
    responder: &mut Responder,
) {
    let body = call.body.take();
    call.body = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(request_id = %id, "Cancelled while transforming request");
            responder.resolve(Err(GatewayError::Cancelled));
            return;
        }
        body = transform::apply(ctx.transform.as_deref(), id, &call.path, body) => body,
    };
    let path = call.path.clone();

    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(request_id = %id, "Cancelled while waiting for backend");
            responder.resolve(Err(GatewayError::Cancelled));
            return;
        }
        sent = ctx.backend.send(call) => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(request_id = %id, path = %path, "{}", e);
            responder.resolve(Err(e));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::info!(request_id = %id, status = %status.as_u16(), "Backend returned error status, passing through");
    }

    let (upstream, sender) =
        UpstreamResponse::channel(status, response.headers().clone(), ctx.relay_buffer);
    if !responder.resolve(Ok(upstream)) {
        tracing::debug!(request_id = %id, "Caller left before the response was ready");
        return;
    }

    match relay::pump(response, sender, cancel).await {
        RelayOutcome::Completed { chunks, bytes } => {
            tracing::debug!(request_id = %id, chunks, bytes, "Relay completed");
        }
        RelayOutcome::CallerGone { chunks, bytes } | RelayOutcome::Cancelled { chunks, bytes } => {
            tracing::info!(request_id = %id, chunks, bytes, "Caller went away mid-stream, closing backend call");
        }
        RelayOutcome::BackendFailed { chunks, error } => {
            tracing::warn!(request_id = %id, chunks, "Backend stream failed: {}", error);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
