//! Seams to the external object store.
//!
//! The Kubernetes client, watcher and cache live outside this codebase.
//! The controller and webhook consume them through these traits; tests
//! implement them in memory.

use async_trait::async_trait;
use thiserror::Error;

use crate::escalation::{Escalation, EscalationStatus};
use crate::policy::EscalationPolicy;

/// Failure of a store operation.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("object {name:?} not found")]
    NotFound {
        /// Name of the missing object.
        name: String,
    },

    /// A write lost the optimistic-concurrency race; the revision tag on
    /// the submitted object is stale.
    #[error("conflicting write on {name:?}")]
    Conflict {
        /// Name of the contended object.
        name: String,
    },

    /// The store could not be reached or answered with a retryable error.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Unavailable(_))
    }
}

/// Read access to escalation policies, usually backed by a cache snapshot.
#[async_trait]
pub trait PolicyGetter: Send + Sync {
    /// Fetch a policy by name.
    async fn get(&self, name: &str) -> Result<EscalationPolicy, StoreError>;
}

/// Write access to the escalation status sub-resource.
///
/// Only the status is ever written; the spec is immutable after admission.
#[async_trait]
pub trait EscalationStatusUpdater: Send + Sync {
    /// Persist `status` onto `escalation`, returning the stored object with
    /// its new revision tag. The write carries the escalation's current
    /// revision and fails with [`StoreError::Conflict`] when stale.
    async fn update_status(
        &self,
        escalation: &Escalation,
        status: EscalationStatus,
    ) -> Result<Escalation, StoreError>;
}
