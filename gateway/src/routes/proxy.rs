//! Catch-all proxy handler.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};

use crate::gateway::{Gateway, ProxiedCall};

/// ANY /{path...} - queue the call and stream the backend's answer back.
///
/// Every admitted call gets exactly one response: the backend's (any
/// status), or a gateway error (502, 500, 503, 504).
pub async fn proxy(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    let body = (!body.is_empty()).then_some(body);

    match gateway.submit(ProxiedCall::new(method, path, headers, body)).await {
        Ok((upstream, guard)) => upstream.into_response(Some(guard)),
        Err(e) => e.into_response(),
    }
}
