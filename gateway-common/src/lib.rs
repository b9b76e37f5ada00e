//! Inference Gateway Common Types
//!
//! Shared types used by the gateway and by clients reading its status endpoints.

pub mod priority;
pub mod status;

pub use priority::PriorityTier;
pub use status::{ErrorBody, HealthReport, HealthStatus, MetricsSnapshot};
