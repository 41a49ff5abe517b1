//! The escalation policy entity.
//!
//! Policies are authored by cluster operators and read-only for the
//! controller: it captures their identity when an escalation goes PENDING
//! and refuses to proceed if the live policy no longer matches.

use serde::{Deserialize, Serialize};

use crate::duration::HumanDuration;
use crate::meta::ObjectMeta;
use crate::rbac::Subject;
use crate::value::ValueWithKind;

/// An operator-authored declaration of who may request which grants, for
/// how long.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Object identity; `uid` and `resource_version` pin the exact revision
    /// an escalation was accepted against.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// The policy content.
    pub spec: EscalationPolicySpec,
}

impl EscalationPolicy {
    /// Store-assigned identity of this policy.
    pub fn uid(&self) -> &str {
        &self.metadata.uid
    }

    /// Store-assigned revision of this policy.
    pub fn version(&self) -> &str {
        &self.metadata.resource_version
    }
}

/// Content of an escalation policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicySpec {
    /// Principals allowed to invoke this policy.
    pub subjects: Vec<Subject>,

    /// Reserved slot for review challenges. No challenge kind is defined
    /// yet; the field exists so adding one is not a schema change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<ValueWithKind>,

    /// What invoking the policy grants, and for how long.
    pub target: EscalationTarget,
}

/// Durations and grants conferred by a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationTarget {
    /// Duration applied when the escalation does not ask for one.
    pub default_duration: HumanDuration,

    /// Upper bound on the duration an escalation may ask for.
    pub max_duration: HumanDuration,

    /// Ordered, kind-tagged grant specifications. Slot `i` of an
    /// escalation's grant refs corresponds to slot `i` here.
    pub grants: Vec<ValueWithKind>,
}
