//! Grant providers for the kudo escalation system.
//!
//! A grant provider knows how to turn one kind of grant specification into
//! a concrete, time-bounded permission artifact, how to verify that the
//! artifact has not been tampered with, and how to take it back. Providers
//! are looked up through a registry keyed by grant kind, so the reconciler
//! never learns any payload shape.
//!
//! The only in-tree provider issues Kubernetes RoleBindings.

mod granter;
mod registry;
mod role_binding;

pub use granter::{GrantError, Granter};
pub use registry::GranterRegistry;
pub use role_binding::{
    K8sRoleBindingGrant, K8sRoleBindingRef, RoleBindingApi, RoleBindingGranter,
    K8S_ROLE_BINDING_KIND, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
};
