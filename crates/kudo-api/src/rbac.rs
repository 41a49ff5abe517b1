//! Minimal RBAC model.
//!
//! Policy subjects and role references use the Kubernetes RBAC vocabulary;
//! the `RoleBinding` type mirrors the live resource the RoleBinding grant
//! provider creates and inspects through the external RBAC API.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// API group of the Kubernetes RBAC resources.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Kind of principal a [`Subject`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectKind {
    /// A single authenticated user.
    User,
    /// A group of authenticated users.
    Group,
}

/// A principal allowed to use an escalation policy, or granted by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Whether this subject names a user or a group.
    pub kind: SubjectKind,
    /// Principal name, as reported by the authentication layer.
    pub name: String,
}

impl Subject {
    /// A user subject.
    pub fn user(name: impl Into<String>) -> Self {
        Subject {
            kind: SubjectKind::User,
            name: name.into(),
        }
    }

    /// A group subject.
    pub fn group(name: impl Into<String>) -> Self {
        Subject {
            kind: SubjectKind::Group,
            name: name.into(),
        }
    }
}

/// Reference to the role a binding grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    /// API group of the referenced role.
    pub api_group: String,
    /// `Role` or `ClusterRole`.
    pub kind: String,
    /// Name of the referenced role.
    pub name: String,
}

/// A live role binding, as observed through the external RBAC API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    /// Object metadata; `namespace` lives in [`RoleBinding::namespace`]
    /// because bindings are namespaced while kudo objects are not.
    pub metadata: ObjectMeta,
    /// Namespace the binding takes effect in.
    pub namespace: String,
    /// Principals the binding grants the role to.
    pub subjects: Vec<Subject>,
    /// The granted role.
    pub role_ref: RoleRef,
}
