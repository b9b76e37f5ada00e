//! Error types for the inference gateway.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use inference_gateway_common::ErrorBody;
use thiserror::Error;

/// Per-request failures.
///
/// Every variant is delivered to the waiting caller through its response
/// channel; none of them crosses a worker boundary as a panic or aborts the
/// process. A backend that answers with a non-2xx status is not an error:
/// its response is relayed verbatim.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Request timed out in queue")]
    AdmissionTimeout(Duration),

    #[error("Admission queue is full ({0} requests waiting)")]
    AdmissionRejected(usize),

    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Request was cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AdmissionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::AdmissionRejected(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ShuttingDown | GatewayError::Cancelled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Machine-readable kind reported in the `status` field of the error body.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::AdmissionTimeout(_) => "timeout",
            GatewayError::AdmissionRejected(_) => "rejected",
            GatewayError::ShuttingDown => "shutting_down",
            GatewayError::Cancelled => "cancelled",
            GatewayError::BackendUnreachable(_) | GatewayError::Internal(_) => "error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.to_string(),
            status: self.kind().to_string(),
        });

        (self.status_code(), body).into_response()
    }
}

/// Startup failures. The only errors allowed to end the process.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Worker pool needs at least one worker (max_concurrent_requests = 0)")]
    NoWorkers,

    #[error("Failed to build backend HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
