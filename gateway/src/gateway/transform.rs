//! Optional request-body transform invoked before forwarding.
//!
//! The gateway does not rewrite requests itself. Deployments that augment
//! prompts (for example with retrieved context) plug in a
//! [`RequestTransform`]; a failing transform never fails the request.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
#[error("Request transform failed: {0}")]
pub struct TransformError(pub String);

/// Rewrites a request body before it reaches the backend.
#[async_trait]
pub trait RequestTransform: Send + Sync {
    async fn transform(&self, path: &str, body: Bytes) -> Result<Bytes, TransformError>;
}

/// Run the transform once over `body`, falling back to the original body on failure.
pub(crate) async fn apply(
    transform: Option<&dyn RequestTransform>,
    request_id: Uuid,
    path: &str,
    body: Option<Bytes>,
) -> Option<Bytes> {
    let (transform, body) = match (transform, body) {
        (Some(t), Some(b)) => (t, b),
        (_, body) => return body,
    };

    match transform.transform(path, body.clone()).await {
        Ok(rewritten) => Some(rewritten),
        Err(e) => {
            tracing::warn!(request_id = %request_id, path = %path, "{}, forwarding original body", e);
            Some(body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Upper {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestTransform for Upper {
        async fn transform(&self, _path: &str, body: Bytes) -> Result<Bytes, TransformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(body.to_ascii_uppercase()))
        }
    }

    struct Failing;

    #[async_trait]
    impl RequestTransform for Failing {
        async fn transform(&self, _path: &str, _body: Bytes) -> Result<Bytes, TransformError> {
            Err(TransformError("vector store offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_transform_applied_once() {
        let upper = Upper { calls: AtomicUsize::new(0) };
        let body = apply(Some(&upper), Uuid::new_v4(), "/api/chat", Some(Bytes::from("hi"))).await;

        assert_eq!(body.unwrap(), "HI");
        assert_eq!(upper.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_passes_original_body() {
        let body = apply(Some(&Failing), Uuid::new_v4(), "/api/chat", Some(Bytes::from("hi"))).await;
        assert_eq!(body.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_no_body_skips_transform() {
        let upper = Upper { calls: AtomicUsize::new(0) };
        assert!(apply(Some(&upper), Uuid::new_v4(), "/api/tags", None).await.is_none());
        assert_eq!(upper.calls.load(Ordering::SeqCst), 0);
    }
}
