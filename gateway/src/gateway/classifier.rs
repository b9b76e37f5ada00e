//! Request classification into priority tiers.

use inference_gateway_common::PriorityTier;
use serde_json::Value;

const SYSTEM_ENDPOINTS: &[&str] = &["/api/tags", "/api/version", "/api/ps", "/v1/models"];
const COMPLETION_ENDPOINTS: &[&str] = &["/api/generate", "/v1/completions"];
const EMBEDDING_ENDPOINTS: &[&str] = &["/api/embeddings", "/api/embed", "/v1/embeddings"];
const CHAT_ENDPOINTS: &[&str] = &["/api/chat", "/v1/chat/completions"];
const MANAGEMENT_ENDPOINTS: &[&str] = &[
    "/api/pull",
    "/api/push",
    "/api/create",
    "/api/copy",
    "/api/delete",
];

/// Assign a priority tier to a request.
///
/// Rules are checked in tier order, so a path matching several endpoint
/// families gets the most urgent one. The query string is ignored. The body
/// is accepted so rules can look at it later; none does today.
pub fn classify(path: &str, _body: Option<&Value>) -> PriorityTier {
    let path = path.split('?').next().unwrap_or(path);
    let matches = |endpoints: &[&str]| endpoints.iter().any(|e| path.contains(e));

    if matches(SYSTEM_ENDPOINTS) {
        PriorityTier::System
    } else if matches(COMPLETION_ENDPOINTS) {
        PriorityTier::Completion
    } else if matches(EMBEDDING_ENDPOINTS) {
        PriorityTier::Embeddings
    } else if matches(CHAT_ENDPOINTS) {
        PriorityTier::Chat
    } else if matches(MANAGEMENT_ENDPOINTS) {
        PriorityTier::Management
    } else {
        PriorityTier::Other
    }
}
