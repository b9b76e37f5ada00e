//! Health, metrics and error payloads served by the gateway.

use serde::{Deserialize, Serialize};

/// Overall gateway health as seen by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Backend answered its version probe
    Healthy,
    /// Backend is reachable but answered the probe with an error status
    Degraded,
    /// Backend could not be reached
    Unhealthy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Short description of the backend connection ("connected", "error: 500", ...).
    pub backend_status: String,
    pub queue_length: usize,
    pub active_workers: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Requests admitted but not yet picked up by a worker.
    pub queue_length: usize,
    /// Live dispatch workers.
    pub active_workers: usize,
    /// Configured pool size.
    pub max_workers: usize,
    /// Workers currently forwarding or streaming a request.
    pub busy_workers: usize,
}

/// JSON error body returned for gateway-generated failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Machine-readable kind ("timeout", "rejected", "error", ...).
    pub status: String,
}
