//! The grant provider contract.

use async_trait::async_trait;
use thiserror::Error;

use kudo_api::{Escalation, EscalationGrantRef, StoreError, ValueError, ValueWithKind};

/// Failure of a grant operation.
#[derive(Debug, Error)]
pub enum GrantError {
    /// The fingerprint recorded for a grant no longer matches the live
    /// resource. Someone edited a kudo-managed resource out of band; the
    /// escalation must be denied and its grants reclaimed.
    #[error("kudo managed resource has been tampered with: {detail}")]
    Tampered {
        /// Which resource mismatched.
        detail: String,
    },

    /// No provider is registered for the requested grant kind.
    #[error("unknown grant kind {kind:?}")]
    UnknownKind {
        /// The unregistered kind.
        kind: String,
    },

    /// The escalation names no namespace and the grant has no default.
    #[error("no target namespace: the escalation requests none and the grant has no default")]
    NoNamespace,

    /// The escalation asks for a namespace the grant does not allow.
    #[error("namespace {namespace:?} is not allowed by this grant")]
    NamespaceNotAllowed {
        /// The rejected namespace.
        namespace: String,
    },

    /// The grant payload could not be decoded into the provider's shape.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// The external API behind the provider failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GrantError {
    /// Whether this error is the tamper signal.
    pub fn is_tampered(&self) -> bool {
        matches!(self, GrantError::Tampered { .. })
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GrantError::Store(err) if err.is_retryable())
    }
}

/// One class of grant: how to provision it, reclaim it, and pre-check it.
#[async_trait]
pub trait Granter: Send + Sync {
    /// Provision the grant described by `grant` for `escalation`.
    ///
    /// Idempotent: when the escalation already owns a matching, untouched
    /// grant, the existing fingerprint comes back with no side effect.
    /// A recorded fingerprint that no longer matches the live resource
    /// fails with [`GrantError::Tampered`]; this is the only way tampering
    /// surfaces.
    async fn create(
        &self,
        escalation: &Escalation,
        grant: &ValueWithKind,
    ) -> Result<EscalationGrantRef, GrantError>;

    /// Delete the underlying resource if it still exists. A missing
    /// resource is success: reclaim is idempotent.
    async fn reclaim(
        &self,
        reference: &EscalationGrantRef,
    ) -> Result<EscalationGrantRef, GrantError>;

    /// Pure pre-check used by the admission gate: would `create` be able
    /// to run for this escalation and grant?
    async fn validate(
        &self,
        escalation: &Escalation,
        grant: &ValueWithKind,
    ) -> Result<(), GrantError>;
}

impl std::fmt::Debug for dyn Granter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Granter")
    }
}
