//! Kubernetes RoleBinding grant provider.
//!
//! Grants of kind `KubernetesRoleBinding` materialize as a RoleBinding in
//! the resolved target namespace, binding the policy's role to the
//! escalation requestor. The recorded fingerprint is the binding's name,
//! namespace, uid and resource version; any divergence between a recorded
//! fingerprint and the live binding is the tamper signal.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use kudo_api::rbac::{RoleBinding, RoleRef, Subject, RBAC_GROUP};
use kudo_api::{
    Escalation, EscalationGrantRef, GrantStatus, ObjectMeta, StoreError, ValueWithKind,
};

use crate::granter::{GrantError, Granter};

/// Grant kind handled by this provider.
pub const K8S_ROLE_BINDING_KIND: &str = "KubernetesRoleBinding";

/// Label marking resources this system manages.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/created-by";

/// Value of [`MANAGED_BY_LABEL`] on resources we create.
pub const MANAGED_BY_VALUE: &str = "kudo";

const GENERATE_NAME_PREFIX: &str = "kudo-grant-";

/// Payload of a `KubernetesRoleBinding` grant inside a policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sRoleBindingGrant {
    /// Namespace used when the escalation does not request one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_namespace: String,

    /// Namespaces the escalation may request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_namespaces: Vec<String>,

    /// The role the binding grants.
    pub role_ref: RoleRef,
}

/// Fingerprint of a provisioned role binding, stored in the escalation
/// status as the payload of a tagged grant ref.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct K8sRoleBindingRef {
    /// Name of the binding.
    pub name: String,
    /// Namespace of the binding.
    pub namespace: String,
    /// Store-assigned identity observed at creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Store-assigned revision observed at creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

impl K8sRoleBindingRef {
    fn of(binding: &RoleBinding) -> Self {
        K8sRoleBindingRef {
            name: binding.metadata.name.clone(),
            namespace: binding.namespace.clone(),
            uid: binding.metadata.uid.clone(),
            resource_version: binding.metadata.resource_version.clone(),
        }
    }

    fn into_grant_ref(self, status: GrantStatus) -> Result<EscalationGrantRef, GrantError> {
        let reference = ValueWithKind::encode(K8S_ROLE_BINDING_KIND, &self)?;
        Ok(EscalationGrantRef { status, reference })
    }
}

/// External RBAC surface this provider drives.
///
/// Stands in for the Kubernetes RBAC client and lister; create assigns the
/// binding's name (from `generate_name`), uid and resource version.
#[async_trait]
pub trait RoleBindingApi: Send + Sync {
    /// Fetch a binding, `None` when absent.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>, StoreError>;

    /// Persist a new binding, returning it with store-assigned identity.
    async fn create(&self, binding: RoleBinding) -> Result<RoleBinding, StoreError>;

    /// Delete a binding. Deleting an absent binding is
    /// [`StoreError::NotFound`].
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Grant provider issuing Kubernetes RoleBindings.
pub struct RoleBindingGranter {
    api: Arc<dyn RoleBindingApi>,
}

impl RoleBindingGranter {
    /// Build a provider over the external RBAC surface.
    pub fn new(api: Arc<dyn RoleBindingApi>) -> Self {
        RoleBindingGranter { api }
    }

    /// Pick the namespace a binding lands in.
    ///
    /// An empty escalation namespace falls back to the grant default (and
    /// fails when there is none); a requested namespace must be in the
    /// grant's allow list.
    fn resolve_namespace(
        escalation: &Escalation,
        grant: &K8sRoleBindingGrant,
    ) -> Result<String, GrantError> {
        let requested = escalation.spec.namespace.as_str();

        if requested.is_empty() {
            if grant.default_namespace.is_empty() {
                return Err(GrantError::NoNamespace);
            }
            return Ok(grant.default_namespace.clone());
        }

        if grant.allowed_namespaces.iter().any(|ns| ns == requested) {
            return Ok(requested.to_string());
        }

        Err(GrantError::NamespaceNotAllowed {
            namespace: requested.to_string(),
        })
    }

    /// Look for a binding already provisioned for this escalation + grant.
    ///
    /// Walks the recorded fingerprints; a recorded binding that still
    /// exists but carries a different uid or resource version is tampered.
    async fn find_binding(
        &self,
        escalation: &Escalation,
        grant: &K8sRoleBindingGrant,
    ) -> Result<Option<RoleBinding>, GrantError> {
        for grant_ref in &escalation.status.grant_refs {
            if grant_ref.reference.kind() != K8S_ROLE_BINDING_KIND
                || grant_ref.status != GrantStatus::Created
            {
                continue;
            }

            let recorded: K8sRoleBindingRef = grant_ref.reference.decode()?;
            if recorded.name.is_empty() {
                continue;
            }

            let Some(binding) = self.api.get(&recorded.namespace, &recorded.name).await? else {
                continue;
            };

            // An empty recorded fingerprint is "nothing observed yet", not
            // tamper evidence.
            let fingerprinted = !recorded.uid.is_empty() || !recorded.resource_version.is_empty();
            if fingerprinted
                && (binding.metadata.uid != recorded.uid
                    || binding.metadata.resource_version != recorded.resource_version)
            {
                return Err(GrantError::Tampered {
                    detail: format!(
                        "role binding {} in namespace {}",
                        binding.metadata.name, binding.namespace
                    ),
                });
            }

            if binding.role_ref.kind == grant.role_ref.kind
                && binding.role_ref.name == grant.role_ref.name
            {
                return Ok(Some(binding));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Granter for RoleBindingGranter {
    async fn create(
        &self,
        escalation: &Escalation,
        grant: &ValueWithKind,
    ) -> Result<EscalationGrantRef, GrantError> {
        let grant: K8sRoleBindingGrant = grant.decode()?;
        let namespace = Self::resolve_namespace(escalation, &grant)?;

        if let Some(existing) = self.find_binding(escalation, &grant).await? {
            return K8sRoleBindingRef::of(&existing).into_grant_ref(GrantStatus::Created);
        }

        let binding = self
            .api
            .create(RoleBinding {
                metadata: ObjectMeta {
                    generate_name: GENERATE_NAME_PREFIX.to_string(),
                    labels: BTreeMap::from([(
                        MANAGED_BY_LABEL.to_string(),
                        MANAGED_BY_VALUE.to_string(),
                    )]),
                    owner_references: vec![escalation.as_owner_ref()],
                    ..ObjectMeta::default()
                },
                namespace: namespace.clone(),
                subjects: vec![Subject::user(&escalation.spec.requestor)],
                role_ref: RoleRef {
                    api_group: RBAC_GROUP.to_string(),
                    kind: grant.role_ref.kind.clone(),
                    name: grant.role_ref.name.clone(),
                },
            })
            .await?;

        info!(
            escalation = %escalation.metadata.name,
            namespace = %namespace,
            role_ref = %grant.role_ref.name,
            role_binding = %binding.metadata.name,
            "created a new role binding",
        );

        K8sRoleBindingRef::of(&binding).into_grant_ref(GrantStatus::Created)
    }

    async fn reclaim(
        &self,
        reference: &EscalationGrantRef,
    ) -> Result<EscalationGrantRef, GrantError> {
        let recorded: K8sRoleBindingRef = reference.reference.decode()?;
        let reclaimed = recorded.clone().into_grant_ref(GrantStatus::Reclaimed)?;

        // Nothing was ever provisioned for this slot.
        if recorded.name.is_empty() {
            return Ok(reclaimed);
        }

        if self
            .api
            .get(&recorded.namespace, &recorded.name)
            .await?
            .is_none()
        {
            return Ok(reclaimed);
        }

        match self.api.delete(&recorded.namespace, &recorded.name).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        info!(
            namespace = %recorded.namespace,
            role_binding = %recorded.name,
            "deleted a role binding",
        );

        Ok(reclaimed)
    }

    async fn validate(
        &self,
        escalation: &Escalation,
        grant: &ValueWithKind,
    ) -> Result<(), GrantError> {
        let grant: K8sRoleBindingGrant = grant.decode()?;
        Self::resolve_namespace(escalation, &grant).map(|_| ())
    }
}
