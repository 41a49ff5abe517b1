//! The escalation request entity and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;
use crate::meta::{ObjectMeta, OwnerReference};
use crate::value::ValueWithKind;
use crate::{GROUP, KIND_ESCALATION, VERSION};

/// A user-submitted request to temporarily gain the permissions described
/// by an escalation policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    /// Object identity; `name` is unique cluster-wide.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// What the user asked for. Never rewritten by the controller after
    /// admission.
    pub spec: EscalationSpec,
    /// Controller-owned state, written through the status sub-resource.
    #[serde(default)]
    pub status: EscalationStatus,
}

impl Escalation {
    /// Owner link placed on every grant created for this escalation, so the
    /// storage layer cascades deletion even without controller action.
    pub fn as_owner_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: format!("{GROUP}/{VERSION}"),
            kind: KIND_ESCALATION.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// When the store first persisted this escalation.
    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp
    }
}

/// User-provided half of an escalation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationSpec {
    /// Name of the policy being invoked.
    pub policy_name: String,

    /// Identity of the requesting user. Overwritten by the admission gate
    /// with the authenticated username; user-provided values are ignored.
    #[serde(default)]
    pub requestor: String,

    /// Why the user needs the escalation. Must not be blank.
    #[serde(default)]
    pub reason: String,

    /// Optional namespace override for namespace-scoped grants.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Requested duration. Zero means "use the policy default"; non-zero
    /// values are bounded by the policy maximum at admission.
    #[serde(default, skip_serializing_if = "HumanDuration::is_zero")]
    pub duration: HumanDuration,
}

impl EscalationSpec {
    /// Whether the spec carries the information required to process it.
    pub fn is_valid(&self) -> bool {
        !self.policy_name.trim().is_empty() && !self.reason.trim().is_empty()
    }
}

/// Lifecycle state of an escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscalationState {
    /// Not yet picked up by the controller.
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// Accepted into processing, policy identity captured.
    #[serde(rename = "PENDING")]
    Pending,
    /// Granting in progress or complete; expires at `expires_at`.
    #[serde(rename = "ACCEPTED")]
    Accepted,
    /// Terminally refused; grants are reclaimed.
    #[serde(rename = "DENIED")]
    Denied,
    /// Ran out its duration; grants are reclaimed.
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl std::fmt::Display for EscalationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EscalationState::Unknown => "UNKNOWN",
            EscalationState::Pending => "PENDING",
            EscalationState::Accepted => "ACCEPTED",
            EscalationState::Denied => "DENIED",
            EscalationState::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Provisioning state of a single grant slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantStatus {
    /// Nothing recorded for this slot yet.
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// The underlying resource exists.
    #[serde(rename = "CREATED")]
    Created,
    /// The underlying resource has been deleted.
    #[serde(rename = "RECLAIMED")]
    Reclaimed,
}

/// Fingerprint of a provisioned grant, kept in the escalation status so the
/// provider can find, verify and reclaim the underlying resource.
///
/// The `ref` payload is provider-specific; slot `i` of the status always
/// refers to grant `i` of the policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationGrantRef {
    /// Provisioning state of this slot.
    #[serde(default)]
    pub status: GrantStatus,
    /// Kind-tagged provider fingerprint of the underlying resource.
    #[serde(rename = "ref", default)]
    pub reference: ValueWithKind,
}

impl EscalationGrantRef {
    /// A slot recording a created grant.
    pub fn created(reference: ValueWithKind) -> Self {
        EscalationGrantRef {
            status: GrantStatus::Created,
            reference,
        }
    }

    /// A slot recording a reclaimed grant.
    pub fn reclaimed(reference: ValueWithKind) -> Self {
        EscalationGrantRef {
            status: GrantStatus::Reclaimed,
            reference,
        }
    }
}

/// Controller-owned status of an escalation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EscalationStatus {
    /// Current lifecycle state.
    pub state: EscalationState,

    /// Human-readable progress message for whoever watches the object.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub state_details: String,

    /// Identity of the policy captured when the escalation went PENDING.
    /// Frozen for the life of the object once set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub policy_uid: String,

    /// Revision of the policy captured when the escalation went PENDING.
    /// Frozen for the life of the object once set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub policy_version: String,

    /// When the granted permissions lapse. Monotone non-decreasing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// One slot per policy grant, positionally aligned.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grant_refs: Vec<EscalationGrantRef>,
}

impl EscalationStatus {
    /// A copy of this status in the target state.
    ///
    /// Everything else carries over unchanged; chain the `with_*` mutators
    /// to update details, refs, policy identity or expiry.
    pub fn transition_to(&self, state: EscalationState) -> EscalationStatus {
        EscalationStatus {
            state,
            ..self.clone()
        }
    }

    /// Replace the progress message.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.state_details = details.into();
        self
    }

    /// Replace the grant slots.
    pub fn with_grant_refs(mut self, grant_refs: Vec<EscalationGrantRef>) -> Self {
        self.grant_refs = grant_refs;
        self
    }

    /// Capture the policy identity. No-op when already captured: the pinned
    /// identity is frozen for the object's life.
    pub fn with_policy_info(mut self, uid: impl Into<String>, version: impl Into<String>) -> Self {
        if self.policy_uid.is_empty() && self.policy_version.is_empty() {
            self.policy_uid = uid.into();
            self.policy_version = version.into();
        }
        self
    }

    /// Raise the expiry. A value earlier than the recorded one is ignored:
    /// `expires_at` never goes backwards.
    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        match self.expires_at {
            Some(current) if expires_at < current => {}
            _ => self.expires_at = Some(expires_at),
        }
        self
    }

    /// True when every grant slot is in `status`. False for an empty slot
    /// list: an escalation with no recorded grants has granted nothing.
    pub fn all_grants_in_status(&self, status: GrantStatus) -> bool {
        if self.grant_refs.is_empty() {
            return false;
        }

        self.grant_refs.iter().all(|r| r.status == status)
    }
}
