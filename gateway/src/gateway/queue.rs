//! Priority admission queue.
//!
//! Holds admitted requests until a dispatch worker picks them up. Entries
//! leave in `(tier, enqueued_at)` order; an admission counter breaks exact
//! timestamp ties so equal-tier requests stay FIFO.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use inference_gateway_common::PriorityTier;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::relay::UpstreamResponse;
use crate::error::GatewayError;

/// Terminal outcome delivered to the caller waiting on a request.
pub type Outcome = Result<UpstreamResponse, GatewayError>;

/// Single-use handle resolving a request's response channel.
///
/// Resolution consumes the underlying sender, so a request is answered at
/// most once. A responder dropped before being resolved answers with
/// `GatewayError::Internal`, so a waiting caller never hangs.
#[derive(Debug)]
pub struct Responder {
    tx: Option<oneshot::Sender<Outcome>>,
}

impl Responder {
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Deliver the outcome.
    ///
    /// Returns false if the responder was already resolved or the caller
    /// stopped waiting; in the second case the outcome is dropped.
    pub fn resolve(&mut self, outcome: Outcome) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    /// True once the caller dropped its end of the channel.
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(GatewayError::Internal(
                "request dropped without a response".to_string(),
            )));
        }
    }
}

/// The HTTP call to replay against the backend.
#[derive(Debug, Clone)]
pub struct ProxiedCall {
    pub method: Method,
    /// Path plus query string, e.g. `/api/tags?verbose=1`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ProxiedCall {
    pub fn new(method: Method, path: impl Into<String>, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers,
            body,
        }
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// A request admitted into the queue.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: Uuid,
    pub tier: PriorityTier,
    pub enqueued_at: Instant,
    pub call: ProxiedCall,
    /// Cancelled when the caller stops waiting or disconnects.
    pub cancel: CancellationToken,
    pub responder: Responder,
}

impl PendingRequest {
    /// Create a request and the receiver its caller awaits.
    pub fn new(tier: PriorityTier, call: ProxiedCall) -> (Self, oneshot::Receiver<Outcome>) {
        let (responder, rx) = Responder::channel();
        let request = Self {
            id: Uuid::new_v4(),
            tier,
            enqueued_at: Instant::now(),
            call,
            cancel: CancellationToken::new(),
            responder,
        };
        (request, rx)
    }

    /// Override the admission timestamp.
    pub fn with_enqueued_at(mut self, at: Instant) -> Self {
        self.enqueued_at = at;
        self
    }

    /// Time spent waiting since admission.
    pub fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

struct QueueEntry {
    seq: u64,
    request: PendingRequest,
}

impl QueueEntry {
    fn key(&self) -> (PriorityTier, Instant, u64) {
        (self.request.tier, self.request.enqueued_at, self.seq)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap; reverse so the smallest key pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe priority queue shared by ingress handlers and workers.
pub struct AdmissionQueue {
    state: Mutex<QueueState>,
    /// Wakes one idle worker per admitted request.
    notify: Notify,
    max_depth: Option<usize>,
}

impl AdmissionQueue {
    /// Create a queue. `max_depth = None` never rejects.
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
            max_depth,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the queue with abandoned entries removed.
    ///
    /// A caller that timed out or disconnected cancels its token while the
    /// entry is still queued; such entries must not occupy depth.
    fn lock_live(&self) -> MutexGuard<'_, QueueState> {
        let mut state = self.lock();
        let before = state.heap.len();
        state.heap.retain(|entry| !entry.request.cancel.is_cancelled());

        let pruned = before - state.heap.len();
        if pruned > 0 {
            tracing::debug!("Pruned {} abandoned requests from the queue", pruned);
        }
        state
    }

    /// Admit a request.
    ///
    /// On rejection the request's responder is resolved with the same error
    /// that is returned.
    pub fn enqueue(&self, mut request: PendingRequest) -> Result<(), GatewayError> {
        {
            let mut state = self.lock_live();

            let rejection = if state.closed {
                Some(GatewayError::ShuttingDown)
            } else {
                match self.max_depth {
                    Some(max) if state.heap.len() >= max => {
                        Some(GatewayError::AdmissionRejected(state.heap.len()))
                    }
                    _ => None,
                }
            };

            if let Some(err) = rejection {
                drop(state);
                tracing::warn!(request_id = %request.id, "Rejecting request: {}", err);
                request.responder.resolve(Err(err.clone()));
                return Err(err);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(QueueEntry { seq, request });
        }

        self.notify.notify_one();
        Ok(())
    }

    /// Pop the most urgent request without waiting.
    pub fn try_dequeue(&self) -> Option<PendingRequest> {
        self.lock().heap.pop().map(|entry| entry.request)
    }

    /// Pop the most urgent request, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on expiry so the caller can re-check its shutdown flag.
    pub async fn dequeue(&self, timeout: Duration) -> Option<PendingRequest> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(request) = self.try_dequeue() {
                return Some(request);
            }
            if self.is_closed() {
                return None;
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Number of live requests admitted but not yet dequeued.
    pub fn len(&self) -> usize {
        self.lock_live().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Stop admitting requests and hand back everything still queued, in
    /// dispatch order.
    pub fn close(&self) -> Vec<PendingRequest> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            let mut drained = Vec::with_capacity(state.heap.len());
            while let Some(entry) = state.heap.pop() {
                drained.push(entry.request);
            }
            drained
        };

        self.notify.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(path: &str) -> ProxiedCall {
        ProxiedCall::new(Method::GET, path, HeaderMap::new(), None)
    }

    fn request_at(tier: PriorityTier, base: Instant, offset_secs: u64, path: &str) -> PendingRequest {
        let (request, _rx) = PendingRequest::new(tier, call(path));
        request.with_enqueued_at(base + Duration::from_secs(offset_secs))
    }

    fn drain_paths(queue: &AdmissionQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.try_dequeue())
            .map(|r| r.call.path)
            .collect()
    }

    #[test]
    fn test_mixed_tiers_dispatch_order() {
        let queue = AdmissionQueue::new(None);
        let base = Instant::now();

        queue.enqueue(request_at(PriorityTier::Chat, base, 0, "t0")).unwrap();
        queue.enqueue(request_at(PriorityTier::System, base, 1, "t1")).unwrap();
        queue.enqueue(request_at(PriorityTier::Chat, base, 2, "t2")).unwrap();
        queue.enqueue(request_at(PriorityTier::Completion, base, 3, "t3")).unwrap();

        assert_eq!(drain_paths(&queue), vec!["t1", "t3", "t0", "t2"]);
    }

    #[test]
    fn test_order_matches_sort_by_tier_then_time() {
        let queue = AdmissionQueue::new(None);
        let base = Instant::now();
        let mut expected = Vec::new();

        // Enqueue in an order unrelated to the expected output.
        for (i, tier) in PriorityTier::ALL.iter().cycle().take(24).enumerate() {
            let offset = ((i * 7) % 24) as u64;
            let path = format!("{}-{}", tier, offset);
            queue.enqueue(request_at(*tier, base, offset, &path)).unwrap();
            expected.push((*tier, offset, path));
        }

        expected.sort();
        let expected: Vec<String> = expected.into_iter().map(|(_, _, p)| p).collect();
        assert_eq!(drain_paths(&queue), expected);
    }

    #[test]
    fn test_equal_tier_is_fifo_even_with_equal_timestamps() {
        let queue = AdmissionQueue::new(None);
        let at = Instant::now();

        for i in 0..5 {
            let (request, _rx) = PendingRequest::new(PriorityTier::Chat, call(&i.to_string()));
            queue.enqueue(request.with_enqueued_at(at)).unwrap();
        }

        assert_eq!(drain_paths(&queue), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_len_tracks_undequeued_entries() {
        let queue = AdmissionQueue::new(None);
        assert!(queue.is_empty());

        for _ in 0..3 {
            let (request, _rx) = PendingRequest::new(PriorityTier::Other, call("/x"));
            queue.enqueue(request).unwrap();
        }
        assert_eq!(queue.len(), 3);

        queue.try_dequeue().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_bounded_queue_rejects_beyond_depth() {
        let queue = AdmissionQueue::new(Some(2));

        for _ in 0..2 {
            let (request, _rx) = PendingRequest::new(PriorityTier::Chat, call("/api/chat"));
            queue.enqueue(request).unwrap();
        }

        let (request, rx) = PendingRequest::new(PriorityTier::Chat, call("/api/chat"));
        let err = queue.enqueue(request).unwrap_err();
        assert!(matches!(err, GatewayError::AdmissionRejected(2)));

        // The caller's channel carries the same rejection.
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, Err(GatewayError::AdmissionRejected(2))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_cancelled_entries_do_not_hold_depth() {
        let queue = AdmissionQueue::new(Some(1));

        let (abandoned, _rx) = PendingRequest::new(PriorityTier::Management, call("/api/pull"));
        let cancel = abandoned.cancel.clone();
        queue.enqueue(abandoned).unwrap();
        assert_eq!(queue.len(), 1);

        cancel.cancel();
        assert_eq!(queue.len(), 0);

        let (live, _rx) = PendingRequest::new(PriorityTier::Chat, call("/api/chat"));
        queue.enqueue(live).unwrap();
        assert_eq!(drain_paths(&queue), vec!["/api/chat"]);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = AdmissionQueue::new(None);
        let start = Instant::now();

        assert!(queue.dequeue(Duration::from_millis(50)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(AdmissionQueue::new(None));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (request, _rx) = PendingRequest::new(PriorityTier::Other, call("/late"));
        queue.enqueue(request).unwrap();

        let request = waiter.await.unwrap().unwrap();
        assert_eq!(request.call.path, "/late");
    }

    #[tokio::test]
    async fn test_close_drains_and_rejects() {
        let queue = AdmissionQueue::new(None);
        let (request, _rx) = PendingRequest::new(PriorityTier::Chat, call("/api/chat"));
        queue.enqueue(request).unwrap();

        let drained = queue.close();
        assert_eq!(drained.len(), 1);
        assert!(queue.is_empty());

        let (request, _rx) = PendingRequest::new(PriorityTier::Chat, call("/api/chat"));
        assert!(matches!(queue.enqueue(request), Err(GatewayError::ShuttingDown)));
        assert!(queue.dequeue(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_responder_answers_internal_error() {
        let (responder, rx) = Responder::channel();
        drop(responder);

        assert!(matches!(rx.await.unwrap(), Err(GatewayError::Internal(_))));
    }

    #[tokio::test]
    async fn test_responder_resolves_once() {
        let (mut responder, rx) = Responder::channel();

        assert!(responder.resolve(Err(GatewayError::Cancelled)));
        assert!(responder.is_resolved());
        assert!(!responder.resolve(Err(GatewayError::ShuttingDown)));

        assert!(matches!(rx.await.unwrap(), Err(GatewayError::Cancelled)));
    }
}
