//! The escalation creation gate.
//!
//! Runs on every CREATE of an escalation, before the object reaches the
//! store: reason present, policy exists, user authorized by the policy
//! subjects, duration within the policy bound, every grant resolvable and
//! valid. The single mutation is the injection of the authenticated
//! username into `/spec/requestor`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use kudo_api::rbac::SubjectKind;
use kudo_api::{Escalation, EscalationPolicy, PolicyGetter};
use kudo_grant::GranterRegistry;

use crate::admission::{
    expected_escalation_kind, AdmissionRequest, AdmissionResponse, Operation, UserInfo,
};
use crate::reviewer::{AdmissionReviewer, ReviewError};

/// Gate for escalation CREATE reviews.
pub struct EscalationCreateReviewer {
    policies: Arc<dyn PolicyGetter>,
    granters: GranterRegistry,
}

impl EscalationCreateReviewer {
    /// Build the gate over the policy cache and the provider registry.
    pub fn new(policies: Arc<dyn PolicyGetter>, granters: GranterRegistry) -> Self {
        EscalationCreateReviewer { policies, granters }
    }
}

#[async_trait]
impl AdmissionReviewer for EscalationCreateReviewer {
    async fn review(
        &self,
        request: &AdmissionRequest,
    ) -> Result<AdmissionResponse, ReviewError> {
        if request.kind != expected_escalation_kind() {
            error!(
                kind = %request.kind,
                username = %request.user_info.username,
                "received unexpected review kind",
            );
            return Err(ReviewError::UnexpectedKind);
        }

        if request.operation != Some(Operation::Create) {
            error!(
                operation = ?request.operation,
                username = %request.user_info.username,
                "received unexpected operation",
            );
            return Err(ReviewError::UnexpectedOperation);
        }

        let escalation: Escalation = serde_json::from_value(request.object.clone())?;

        if escalation.spec.reason.trim().is_empty() {
            info!(
                username = %request.user_info.username,
                "user submitted an escalation request without any reason",
            );
            return Ok(AdmissionResponse::denied(
                "Please provide a reason for your escalation request",
            ));
        }

        let policy = match self.policies.get(&escalation.spec.policy_name).await {
            Ok(policy) => policy,
            Err(err) if err.is_not_found() => {
                info!(
                    username = %request.user_info.username,
                    policy = %escalation.spec.policy_name,
                    "user submitted an escalation request refering to a policy that doesn't exist",
                );
                return Ok(AdmissionResponse::denied(format!(
                    "Unknown policy: {}",
                    escalation.spec.policy_name
                )));
            }
            Err(err) => return Err(err.into()),
        };

        if !user_allowed(&policy, &request.user_info) {
            info!(
                username = %request.user_info.username,
                policy = %policy.metadata.name,
                "user attempted to use an escalation policy, but is not part of the policy subjects",
            );
            return Ok(AdmissionResponse::denied(format!(
                "User {:?} is not allowed to use the escalation policy {:?}",
                request.user_info.username, policy.metadata.name
            )));
        }

        let wanted = escalation.spec.duration;
        if !wanted.is_zero() && wanted > policy.spec.target.max_duration {
            info!(
                username = %request.user_info.username,
                policy = %policy.metadata.name,
                max_duration = %policy.spec.target.max_duration,
                escalation_duration = %wanted,
                "user attempted to escalate for a duration that exceeds the maximum duration of the policy",
            );
            return Ok(AdmissionResponse::denied(format!(
                "Wanted duration [{}] exceeds the maximum duration allowed by the policy [{}]",
                wanted, policy.spec.target.max_duration
            )));
        }

        for grant in &policy.spec.target.grants {
            let granter = match self.granters.get(grant.kind()) {
                Ok(granter) => granter,
                Err(_) => {
                    info!(
                        username = %request.user_info.username,
                        policy = %policy.metadata.name,
                        kind = %grant.kind(),
                        "referred escalation policy has a grant that is not supported",
                    );
                    return Ok(AdmissionResponse::denied(format!(
                        "Policy {:?} refers to an unsupported grant kind {:?}",
                        policy.metadata.name,
                        grant.kind()
                    )));
                }
            };

            if let Err(err) = granter.validate(&escalation, grant).await {
                warn!(
                    username = %request.user_info.username,
                    policy = %policy.metadata.name,
                    error = %err,
                    "user submitted an invalid escalation",
                );
                return Ok(AdmissionResponse::denied(format!(
                    "Escalation is impossible to grant, reason is: {err}"
                )));
            }
        }

        let patch = requestor_patch(&request.user_info)?;

        info!(
            requestor = %request.user_info.username,
            policy = %escalation.spec.policy_name,
            "user submitted an escalation request",
        );

        Ok(AdmissionResponse::allowed().with_json_patch(patch))
    }
}

/// Whether one of the policy subjects covers the authenticated user:
/// a user subject with the same username, or a group subject naming one of
/// the user's groups.
fn user_allowed(policy: &EscalationPolicy, user: &UserInfo) -> bool {
    policy.spec.subjects.iter().any(|subject| match subject.kind {
        SubjectKind::User => subject.name == user.username,
        SubjectKind::Group => user.groups.iter().any(|g| *g == subject.name),
    })
}

/// The JSON patch pinning `/spec/requestor` to the authenticated username.
fn requestor_patch(user: &UserInfo) -> Result<Vec<u8>, ReviewError> {
    #[derive(Serialize)]
    struct PatchOp<'a> {
        op: &'a str,
        path: &'a str,
        value: &'a str,
    }

    Ok(serde_json::to_vec(&[PatchOp {
        op: "replace",
        path: "/spec/requestor",
        value: &user.username,
    }])?)
}
