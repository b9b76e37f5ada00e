use std::convert::Infallible;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures_util::{stream, StreamExt};
use tokio::sync::Notify;

/// Body of Ollama's `/api/version`.
pub fn version_json(version: &str) -> serde_json::Value {
    serde_json::json!({ "version": version })
}

/// One NDJSON line of a streamed `/api/generate` answer.
pub fn generate_line(text: &str, done: bool) -> String {
    format!(
        "{}\n",
        serde_json::json!({
            "model": "test-model",
            "response": text,
            "done": done
        })
    )
}

pub fn error_json(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

/// Backend that streams `chunks`, holding everything after the first one
/// until `gate` is notified.
pub fn gated_stream(chunks: Vec<&'static str>, gate: Arc<Notify>) -> Router {
    let handler = move || {
        let chunks = chunks.clone();
        let gate = gate.clone();
        async move {
            let body = stream::unfold((0usize, chunks, gate), |(i, chunks, gate)| async move {
                if i >= chunks.len() {
                    return None;
                }
                if i == 1 {
                    gate.notified().await;
                }
                let chunk = Bytes::from_static(chunks[i].as_bytes());
                Some((Ok::<_, Infallible>(chunk), (i + 1, chunks, gate)))
            });
            ndjson(Body::from_stream(body))
        }
    };
    Router::new().route("/api/generate", any(handler))
}

/// Backend that sends `first` and then drops the connection mid-body.
pub fn broken_stream(first: &'static str) -> Router {
    let handler = move || async move {
        let head = stream::once(async move { Ok::<_, io::Error>(Bytes::from_static(first.as_bytes())) });
        let crash = stream::once(async {
            // Let the first chunk reach the wire before the connection dies.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "model crashed"))
        });
        let body = head.chain(crash);
        ndjson(Body::from_stream(body))
    };
    Router::new().fallback(any(handler))
}

/// Backend that streams `chunks` with `delay` before each one.
pub fn slow_stream(chunks: Vec<String>, delay: Duration) -> Router {
    let handler = move || {
        let chunks = chunks.clone();
        async move {
            let body = stream::iter(chunks).then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, Infallible>(Bytes::from(chunk))
            });
            ndjson(Body::from_stream(body))
        }
    };
    Router::new().fallback(any(handler))
}

/// Backend that accepts requests and never answers.
pub fn hanging(accepted: Arc<AtomicUsize>) -> Router {
    Router::new().fallback(any(move || {
        let accepted = accepted.clone();
        async move {
            accepted.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            StatusCode::OK
        }
    }))
}

fn ndjson(body: Body) -> Response {
    ([("content-type", "application/x-ndjson")], body).into_response()
}

/// Records every request it receives and tracks peak concurrency.
#[derive(Default)]
pub struct Recorder {
    pub seen: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorder {
    pub fn paths(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.path.clone()).collect()
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Backend answering every request with `{"ok":true}` after `delay`,
/// recording it first. `/api/version` answers without recording.
pub fn recording(recorder: Arc<Recorder>, delay: Duration) -> Router {
    async fn handle(
        State((recorder, delay)): State<(Arc<Recorder>, Duration)>,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        recorder.seen.lock().unwrap().push(RecordedRequest { path, headers, body });

        let now = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        recorder.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        recorder.in_flight.fetch_sub(1, Ordering::SeqCst);

        Json(serde_json::json!({ "ok": true })).into_response()
    }

    Router::new()
        .route("/api/version", get(|| async { Json(version_json("0.0.0-test")) }))
        .fallback(handle)
        .with_state((recorder, delay))
}
