//! Admission reviewer contract and combinators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use kudo_api::meta::GroupVersionKind;
use kudo_api::StoreError;

use crate::admission::{AdmissionRequest, AdmissionResponse, Operation};

/// Server-side review failure. These never reach the user as-is; the HTTP
/// handler masks them behind a generic message.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// The review is for an object kind this reviewer does not handle.
    #[error("unexpected review kind")]
    UnexpectedKind,

    /// The review is for an operation this reviewer does not handle.
    #[error("unexpected operation")]
    UnexpectedOperation,

    /// The object under review does not parse.
    #[error("malformed object under review: {0}")]
    MalformedObject(#[from] serde_json::Error),

    /// A backing store lookup failed for reasons other than absence.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Synchronous admission decision point.
#[async_trait]
pub trait AdmissionReviewer: Send + Sync {
    /// Review one admission request within the caller's deadline.
    async fn review(&self, request: &AdmissionRequest)
        -> Result<AdmissionResponse, ReviewError>;
}

/// Reviewer that refuses everything with a fixed reason.
pub struct DenyReviewer {
    reason: String,
}

impl DenyReviewer {
    /// Deny with the given user-visible reason.
    pub fn new(reason: impl Into<String>) -> Self {
        DenyReviewer {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AdmissionReviewer for DenyReviewer {
    async fn review(
        &self,
        _request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, ReviewError> {
        Ok(AdmissionResponse::denied(self.reason.clone()))
    }
}

/// Dispatches reviews by operation, falling back to a default reviewer.
///
/// The default denies with "Unsupported operation".
pub struct OperationRouter {
    routes: HashMap<Operation, Arc<dyn AdmissionReviewer>>,
    fallback: Arc<dyn AdmissionReviewer>,
}

impl OperationRouter {
    /// A router that denies every operation until routes are added.
    pub fn new() -> Self {
        OperationRouter {
            routes: HashMap::new(),
            fallback: Arc::new(DenyReviewer::new("Unsupported operation")),
        }
    }

    /// Route an operation to a reviewer, builder style.
    pub fn handle(mut self, op: Operation, reviewer: Arc<dyn AdmissionReviewer>) -> Self {
        self.routes.insert(op, reviewer);
        self
    }

    /// Replace the fallback reviewer.
    pub fn with_fallback(mut self, reviewer: Arc<dyn AdmissionReviewer>) -> Self {
        self.fallback = reviewer;
        self
    }
}

impl Default for OperationRouter {
    fn default() -> Self {
        OperationRouter::new()
    }
}

#[async_trait]
impl AdmissionReviewer for OperationRouter {
    async fn review(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, ReviewError> {
        let reviewer = request
            .operation
            .and_then(|op| self.routes.get(&op))
            .unwrap_or(&self.fallback);

        reviewer.review(request).await
    }
}

/// Guards the wrapped reviewer behind an exact group/version/kind match.
pub struct RequireKind {
    want: GroupVersionKind,
    next: Arc<dyn AdmissionReviewer>,
}

impl RequireKind {
    /// Only pass reviews for `want` through to `next`.
    pub fn new(want: GroupVersionKind, next: Arc<dyn AdmissionReviewer>) -> Self {
        RequireKind { want, next }
    }
}

#[async_trait]
impl AdmissionReviewer for RequireKind {
    async fn review(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, ReviewError> {
        if request.kind != self.want {
            error!(
                kind = %request.kind,
                username = %request.user_info.username,
                "received unexpected review kind",
            );

            return Ok(AdmissionResponse::denied(format!(
                "Received unexpected kind {}",
                request.kind
            )));
        }

        self.next.review(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::expected_policy_kind;

    struct AllowAll;

    #[async_trait]
    impl AdmissionReviewer for AllowAll {
        async fn review(
            &self,
            _request: &AdmissionRequest,
        ) -> Result<AdmissionResponse, ReviewError> {
            Ok(AdmissionResponse::allowed())
        }
    }

    fn request(operation: Option<Operation>, kind: GroupVersionKind) -> AdmissionRequest {
        AdmissionRequest {
            uid: "review-1".to_string(),
            kind,
            operation,
            ..AdmissionRequest::default()
        }
    }

    #[tokio::test]
    async fn router_dispatches_by_operation() {
        let router = OperationRouter::new()
            .handle(Operation::Create, Arc::new(AllowAll));

        let allowed = router
            .review(&request(Some(Operation::Create), expected_policy_kind()))
            .await
            .unwrap();
        assert!(allowed.allowed);

        let denied = router
            .review(&request(Some(Operation::Delete), expected_policy_kind()))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.result.unwrap().message, "Unsupported operation");
    }

    #[tokio::test]
    async fn router_denies_a_missing_operation() {
        let router = OperationRouter::new().handle(Operation::Create, Arc::new(AllowAll));

        let denied = router
            .review(&request(None, expected_policy_kind()))
            .await
            .unwrap();
        assert!(!denied.allowed);
    }

    #[tokio::test]
    async fn require_kind_rejects_other_kinds() {
        let guard = RequireKind::new(expected_policy_kind(), Arc::new(AllowAll));

        let other = GroupVersionKind::new("apps", "v1", "Deployment");
        let denied = guard
            .review(&request(Some(Operation::Create), other))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert!(denied
            .result
            .unwrap()
            .message
            .starts_with("Received unexpected kind"));

        let allowed = guard
            .review(&request(Some(Operation::Create), expected_policy_kind()))
            .await
            .unwrap();
        assert!(allowed.allowed);
    }
}
