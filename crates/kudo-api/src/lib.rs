//! Object model and wire types for the kudo escalation system.
//!
//! This crate holds everything that crosses the wire or the store boundary:
//! the `Escalation` and `EscalationPolicy` entities, the escalation status
//! state machine, the kind-tagged value codec used to carry polymorphic
//! grant payloads, and the async traits behind which the external object
//! store sits.
//!
//! Nothing in here performs I/O. The controller and webhook crates build on
//! top of these types; test suites implement the store traits in memory.

pub mod duration;
pub mod escalation;
pub mod meta;
pub mod policy;
pub mod rbac;
pub mod store;
pub mod value;

pub use duration::HumanDuration;
pub use escalation::{
    Escalation, EscalationGrantRef, EscalationSpec, EscalationState, EscalationStatus,
    GrantStatus,
};
pub use meta::{GroupVersionKind, ObjectMeta, OwnerReference};
pub use policy::{EscalationPolicy, EscalationPolicySpec, EscalationTarget};
pub use rbac::{RoleBinding, RoleRef, Subject, SubjectKind};
pub use store::{EscalationStatusUpdater, PolicyGetter, StoreError};
pub use value::{ValueError, ValueWithKind};

/// API group of the kudo resources.
pub const GROUP: &str = "k8s.kudo.dev";

/// API version of the kudo resources.
pub const VERSION: &str = "v1alpha1";

/// Object kind of an escalation request.
pub const KIND_ESCALATION: &str = "Escalation";

/// Object kind of an escalation policy.
pub const KIND_ESCALATION_POLICY: &str = "EscalationPolicy";
