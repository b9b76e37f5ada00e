//! Streaming relay between a backend response and the waiting caller.
//!
//! The worker owns the backend connection and pushes chunks into a bounded
//! channel as they arrive; the ingress handler turns the receiving end into
//! a streamed HTTP body. Nothing on this path waits for the full response.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

/// One relayed body item. An error aborts the caller's body.
pub type Chunk = Result<Bytes, io::Error>;

/// Response headers the relay never copies to the caller.
const HOP_BY_HOP: [header::HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

/// Streaming handle handed to the caller once the backend has answered.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: mpsc::Receiver<Chunk>,
}

/// Worker side of the relay channel.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::Sender<Chunk>,
}

impl BodySender {
    /// Push a chunk, waiting for buffer space. Errors once the caller is gone.
    pub async fn send(&self, chunk: Chunk) -> Result<(), CallerGone> {
        self.tx.send(chunk).await.map_err(|_| CallerGone)
    }
}

/// The caller dropped the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerGone;

impl UpstreamResponse {
    /// Create a handle and the sender feeding its body.
    ///
    /// `capacity` bounds how many chunks may sit between worker and caller.
    pub fn channel(status: StatusCode, headers: HeaderMap, capacity: usize) -> (Self, BodySender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                status,
                headers: relayable_headers(&headers),
                body: rx,
            },
            BodySender { tx },
        )
    }

    /// Body chunks in backend order.
    pub fn into_body_stream(self) -> ReceiverStream<Chunk> {
        ReceiverStream::new(self.body)
    }

    /// Build the caller's HTTP response.
    ///
    /// The guard travels with the body: when the caller disconnects and the
    /// body is dropped, the request's token is cancelled and the worker
    /// stops pumping.
    pub fn into_response(self, guard: Option<DropGuard>) -> Response {
        let UpstreamResponse { status, headers, body } = self;
        let stream = GuardedStream {
            inner: ReceiverStream::new(body),
            _guard: guard,
        };

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn relayable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut relayed = headers.clone();
    for name in HOP_BY_HOP.iter() {
        relayed.remove(name);
    }
    relayed
}

struct GuardedStream {
    inner: ReceiverStream<Chunk>,
    _guard: Option<DropGuard>,
}

impl Stream for GuardedStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Backend finished and every chunk was handed over.
    Completed { chunks: usize, bytes: usize },
    /// Caller dropped the body before the backend finished.
    CallerGone { chunks: usize, bytes: usize },
    /// The request's cancellation token fired.
    Cancelled { chunks: usize, bytes: usize },
    /// Backend connection failed mid-stream.
    BackendFailed { chunks: usize, error: String },
}

/// Pump a backend response into the relay channel until it ends.
///
/// Returning drops `response`, which closes the backend connection.
pub async fn pump(
    mut response: reqwest::Response,
    sender: BodySender,
    cancel: &CancellationToken,
) -> RelayOutcome {
    let mut chunks = 0usize;
    let mut bytes = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RelayOutcome::Cancelled { chunks, bytes },
            next = response.chunk() => next,
        };

        match next {
            Ok(Some(chunk)) => {
                let len = chunk.len();
                let delivered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RelayOutcome::Cancelled { chunks, bytes },
                    sent = sender.send(Ok(chunk)) => sent,
                };
                if delivered.is_err() {
                    return RelayOutcome::CallerGone { chunks, bytes };
                }
                chunks += 1;
                bytes += len;
            }
            Ok(None) => return RelayOutcome::Completed { chunks, bytes },
            Err(e) => {
                let error = e.to_string();
                let _ = sender.send(Err(io::Error::other(error.clone()))).await;
                return RelayOutcome::BackendFailed { chunks, error };
            }
        }
    }
}
