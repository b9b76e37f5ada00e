//! HTTP client for the inference backend (Ollama).

use std::time::Duration;

use axum::http::{header, HeaderMap, StatusCode};
use reqwest::Client;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::gateway::ProxiedCall;

/// Request headers never forwarded to the backend.
const STRIPPED_REQUEST_HEADERS: [header::HeaderName; 4] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONNECTION,
    header::TRANSFER_ENCODING,
];

/// Result of a `/api/version` probe that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionProbe {
    /// 2xx answer, with the reported version when the body carried one.
    Ok(Option<String>),
    /// Non-2xx answer.
    Status(StatusCode),
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Client for the single backend the gateway protects.
pub struct BackendClient {
    http_client: Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for `base_url`.
    ///
    /// No total timeout is set: generations stream for minutes. Only the
    /// connect phase is bounded.
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Replay `call` against the backend and return once response headers arrive.
    ///
    /// Any HTTP status counts as success here; only transport failures map
    /// to `BackendUnreachable`.
    pub async fn send(&self, call: ProxiedCall) -> Result<reqwest::Response, GatewayError> {
        let url = self.url_for(&call.path);
        tracing::debug!("Forwarding {} {}", call.method, url);

        let mut request = self
            .http_client
            .request(call.method, &url)
            .headers(forwardable_headers(&call.headers));
        if let Some(body) = call.body {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))
    }

    /// Probe the backend's version endpoint with a short timeout.
    pub async fn probe_version(&self, timeout: Duration) -> Result<VersionProbe, reqwest::Error> {
        let response = self
            .http_client
            .get(self.url_for("/api/version"))
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(VersionProbe::Status(status));
        }

        let version = response
            .json::<VersionResponse>()
            .await
            .ok()
            .map(|v| v.version);
        Ok(VersionProbe::Ok(version))
    }
}

/// Copy of `headers` without the ones the HTTP client must set itself.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in STRIPPED_REQUEST_HEADERS.iter() {
        forwarded.remove(name);
    }
    forwarded
}
