//! Minimal object metadata model.
//!
//! The subset of Kubernetes object metadata the escalation system actually
//! reads or writes. The external store owns `uid`, `resource_version` and
//! `creation_timestamp`; the core only carries them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity and bookkeeping fields shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    /// Unique object name (cluster-scoped for kudo resources).
    pub name: String,

    /// Prefix for a store-generated name. When `name` is empty on create,
    /// the store appends a unique suffix to this and fills `name` in.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    /// Opaque store-assigned identity, stable for the object's life.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Store-assigned revision tag, changes on every write.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    /// When the store first persisted the object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,

    /// Free-form labels.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Owners of this object; deletion of an owner cascades to it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Metadata carrying only a name, for objects about to be created.
    pub fn named(name: impl Into<String>) -> Self {
        ObjectMeta {
            name: name.into(),
            ..ObjectMeta::default()
        }
    }
}

/// A link from a dependent object back to its owning object.
///
/// The storage layer uses these to cascade deletion, independently of any
/// controller action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// `group/version` of the owner.
    pub api_version: String,
    /// Object kind of the owner.
    pub kind: String,
    /// Name of the owner.
    pub name: String,
    /// Store-assigned identity of the owner.
    pub uid: String,
    /// Whether the owner is the managing controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
    /// Whether the owner must be deleted before this object can be.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_owner_deletion: Option<bool>,
}

/// Fully-qualified object kind, as carried in admission requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group, empty for the core group.
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Object kind.
    pub kind: String,
}

impl GroupVersionKind {
    /// Build a group/version/kind triple.
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        GroupVersionKind {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }
}

impl std::fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}
