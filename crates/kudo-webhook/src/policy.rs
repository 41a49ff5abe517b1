//! The escalation policy gate.
//!
//! Runs on CREATE and UPDATE of policies: both durations must be present
//! and positive, and the default must not exceed the maximum. Everything
//! else about a policy is the operator's business.

use async_trait::async_trait;
use tracing::info;

use kudo_api::EscalationPolicy;

use crate::admission::{AdmissionRequest, AdmissionResponse};
use crate::reviewer::{AdmissionReviewer, ReviewError};

/// Gate for escalation policy writes.
#[derive(Debug, Default)]
pub struct PolicyReviewer;

impl PolicyReviewer {
    /// Build the gate.
    pub fn new() -> Self {
        PolicyReviewer
    }
}

#[async_trait]
impl AdmissionReviewer for PolicyReviewer {
    async fn review(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, ReviewError> {
        let policy: EscalationPolicy = serde_json::from_value(request.object.clone())?;
        let target = &policy.spec.target;

        if target.max_duration.is_zero() || target.default_duration.is_zero() {
            info!(
                policy = %policy.metadata.name,
                "policy doesn't have a default or a max duration",
            );
            return Ok(AdmissionResponse::denied(
                "Escalation policy must have a default and a max duration",
            ));
        }

        if target.default_duration > target.max_duration {
            info!(
                policy = %policy.metadata.name,
                "policy has a default duration that exceeds the max duration",
            );
            return Ok(AdmissionResponse::denied(
                "Escalation policy default duration must not exceed max duration",
            ));
        }

        Ok(AdmissionResponse::allowed())
    }
}
