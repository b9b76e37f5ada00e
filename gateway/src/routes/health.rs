//! Health and metrics endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use inference_gateway_common::{HealthReport, HealthStatus, MetricsSnapshot};

use crate::backend::VersionProbe;
use crate::gateway::Gateway;

/// GET /health - probe the backend and report queue state.
///
/// Never fails: an unreachable backend is reported in the body.
pub async fn health(State(gateway): State<Arc<Gateway>>) -> (StatusCode, Json<HealthReport>) {
    let probe = gateway
        .backend()
        .probe_version(gateway.config().health_timeout())
        .await;

    let mut report = HealthReport {
        status: HealthStatus::Healthy,
        backend_status: "connected".to_string(),
        queue_length: gateway.queue().len(),
        active_workers: gateway.pool().active_count(),
        backend_version: None,
        error: None,
    };

    let code = match probe {
        Ok(VersionProbe::Ok(version)) => {
            report.backend_version = Some(version.unwrap_or_else(|| "unknown".to_string()));
            StatusCode::OK
        }
        Ok(VersionProbe::Status(status)) => {
            report.status = HealthStatus::Degraded;
            report.backend_status = format!("error: {}", status.as_u16());
            StatusCode::OK
        }
        Err(e) => {
            tracing::warn!("Backend health probe failed: {}", e);
            report.status = HealthStatus::Unhealthy;
            report.backend_status = "disconnected".to_string();
            report.error = Some(e.to_string());
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (code, Json(report))
}

/// GET /metrics - in-memory counters only.
pub async fn metrics(State(gateway): State<Arc<Gateway>>) -> Json<MetricsSnapshot> {
    Json(gateway.metrics())
}
