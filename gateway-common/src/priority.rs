//! Priority tiers for admitted requests.

use serde::{Deserialize, Serialize};

/// Dispatch priority of a proxied request.
///
/// Lower numeric value dispatches first. The declaration order matches the
/// numeric order, so the derived `Ord` sorts the most urgent tier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// Introspection calls (tags, version) - cheap, answered first
    System = 1,
    /// Text generation
    Completion = 2,
    /// Vector embeddings generation
    Embeddings = 3,
    /// Chat completion
    Chat = 4,
    /// Model pull / management operations
    Management = 5,
    /// Anything the classifier does not recognise
    Other = 10,
}

impl PriorityTier {
    /// All tiers, most urgent first.
    pub const ALL: [PriorityTier; 6] = [
        PriorityTier::System,
        PriorityTier::Completion,
        PriorityTier::Embeddings,
        PriorityTier::Chat,
        PriorityTier::Management,
        PriorityTier::Other,
    ];

    /// Numeric tier value (lower = higher priority).
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityTier::System => "system",
            PriorityTier::Completion => "completion",
            PriorityTier::Embeddings => "embeddings",
            PriorityTier::Chat => "chat",
            PriorityTier::Management => "management",
            PriorityTier::Other => "other",
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
