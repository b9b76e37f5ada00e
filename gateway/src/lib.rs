pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod routes;
pub mod test_util;

pub use backend::BackendClient;
pub use config::Config;
pub use error::{BootError, GatewayError};
pub use gateway::{
    classify, AdmissionQueue, Gateway, PendingRequest, ProxiedCall, RequestTransform,
    TransformError, UpstreamResponse, WorkerPool,
};
pub use inference_gateway_common::{HealthReport, HealthStatus, MetricsSnapshot, PriorityTier};
