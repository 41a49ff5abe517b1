//! Admission gate and webhook HTTP surface for kudo.
//!
//! The gate runs synchronously inside the API server's admission flow:
//! it validates escalation creations (authorization, duration bounds,
//! grant-shape validity), injects the authenticated requestor into the
//! stored object, and checks policy duration invariants on policy writes.
//! Everything user-facing is denied here; the reconciler only ever denies
//! post-acceptance invariant violations.

pub mod admission;
pub mod escalation;
pub mod policy;
pub mod reviewer;
pub mod server;

pub use admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, Operation, PatchType, Status, UserInfo,
};
pub use escalation::EscalationCreateReviewer;
pub use policy::PolicyReviewer;
pub use reviewer::{AdmissionReviewer, DenyReviewer, OperationRouter, RequireKind, ReviewError};
pub use server::{custom_router, router, serve};
