//! Webhook HTTP surface.
//!
//! Two review endpoints plus a health probe. The handler owns the
//! AdmissionReview envelope: it unwraps the request, runs the reviewer,
//! masks server-side failures behind a generic message, and echoes the
//! request uid into the response. TLS termination and timeouts belong to
//! the external listener; `serve` takes an already-bound socket.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::error;

use kudo_api::PolicyGetter;
use kudo_grant::GranterRegistry;

use crate::admission::{expected_policy_kind, AdmissionResponse, AdmissionReview, Operation};
use crate::escalation::EscalationCreateReviewer;
use crate::policy::PolicyReviewer;
use crate::reviewer::{AdmissionReviewer, OperationRouter, RequireKind};

#[derive(Clone)]
struct AppState {
    escalations: Arc<dyn AdmissionReviewer>,
    policies: Arc<dyn AdmissionReviewer>,
}

/// Assemble the webhook router with the standard reviewer wiring.
pub fn router(policies: Arc<dyn PolicyGetter>, granters: GranterRegistry) -> Router {
    let policy_reviewer: Arc<dyn AdmissionReviewer> = Arc::new(PolicyReviewer::new());

    custom_router(
        Arc::new(EscalationCreateReviewer::new(policies, granters)),
        Arc::new(RequireKind::new(
            expected_policy_kind(),
            Arc::new(
                OperationRouter::new()
                    .handle(Operation::Create, policy_reviewer.clone())
                    .handle(Operation::Update, policy_reviewer),
            ),
        )),
    )
}

/// Assemble the webhook router from explicit reviewers.
pub fn custom_router(
    escalations: Arc<dyn AdmissionReviewer>,
    policies: Arc<dyn AdmissionReviewer>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1alpha1/escalations", post(review_escalations))
        .route("/v1alpha1/escalationpolicies", post(review_policies))
        .with_state(AppState {
            escalations,
            policies,
        })
}

/// Serve the router on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn review_escalations(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview>,
) -> Json<AdmissionReview> {
    Json(handle_review(state.escalations.as_ref(), review).await)
}

async fn review_policies(
    State(state): State<AppState>,
    Json(review): Json<AdmissionReview>,
) -> Json<AdmissionReview> {
    Json(handle_review(state.policies.as_ref(), review).await)
}

async fn handle_review(
    reviewer: &dyn AdmissionReviewer,
    mut review: AdmissionReview,
) -> AdmissionReview {
    let Some(request) = review.request.as_ref() else {
        error!("received malformed review payload without any request");
        review.response = Some(AdmissionResponse::unexpected_error());
        return review;
    };

    let mut response = match reviewer.review(request).await {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "reviewer reported an error");
            AdmissionResponse::unexpected_error()
        }
    };

    response.uid = request.uid.clone();
    review.response = Some(response);
    review
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::admission::AdmissionRequest;
    use crate::reviewer::ReviewError;

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

    struct FailingReviewer;

    #[async_trait]
    impl AdmissionReviewer for FailingReviewer {
        async fn review(
            &self,
            _request: &AdmissionRequest,
        ) -> Result<AdmissionResponse, ReviewError> {
            Err(ReviewError::UnexpectedKind)
        }
    }

    fn test_router() -> Router {
        custom_router(Arc::new(AllowAll), Arc::new(FailingReviewer))
    }

    async fn post_review(router: Router, path: &str, body: serde_json::Value) -> AdmissionReview {
        let response = router
            .oneshot(
                Request::post(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_answers_ok() {
        let response = test_router()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn review_echoes_the_request_uid() {
        let review = post_review(
            test_router(),
            "/v1alpha1/escalations",
            serde_json::json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview",
                "request": {"uid": "review-42", "operation": "CREATE"},
            }),
        )
        .await;

        let response = review.response.unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "review-42");
    }

    #[tokio::test]
    async fn reviewer_failure_is_masked() {
        let review = post_review(
            test_router(),
            "/v1alpha1/escalationpolicies",
            serde_json::json!({
                "request": {"uid": "review-7", "operation": "CREATE"},
            }),
        )
        .await;

        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message,
            "Unexpected error, see controller logs for details"
        );
        assert_eq!(response.uid, "review-7");
    }

    #[tokio::test]
    async fn missing_request_is_masked() {
        let review = post_review(
            test_router(),
            "/v1alpha1/escalations",
            serde_json::json!({"kind": "AdmissionReview"}),
        )
        .await;

        let response = review.response.unwrap();
        assert!(!response.allowed);
        assert_eq!(
            response.result.unwrap().message,
            "Unexpected error, see controller logs for details"
        );
    }
}
