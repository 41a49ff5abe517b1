//! Property-based test of the RoleBinding namespace-resolution matrix.
//!
//! For every combination of requested namespace, default namespace and
//! allow list, `validate` must agree with the matrix:
//!
//! 1. nothing requested + default present  -> default is used
//! 2. nothing requested + no default       -> "no namespace"
//! 3. requested and allowed                -> requested is used
//! 4. anything else                        -> "namespace not allowed"

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;

use kudo_api::rbac::{RoleBinding, RoleRef};
use kudo_api::{Escalation, EscalationSpec, ObjectMeta, StoreError};
use kudo_grant::{
    GrantError, Granter, K8sRoleBindingGrant, RoleBindingApi, RoleBindingGranter,
    K8S_ROLE_BINDING_KIND,
};
use kudo_api::ValueWithKind;

/// The validate path never touches the API; any panicking stub would do,
/// but an inert one keeps failures readable.
struct InertApi;

#[async_trait]
impl RoleBindingApi for InertApi {
    async fn get(&self, _: &str, _: &str) -> Result<Option<RoleBinding>, StoreError> {
        Ok(None)
    }

    async fn create(&self, binding: RoleBinding) -> Result<RoleBinding, StoreError> {
        Ok(binding)
    }

    async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

fn arb_namespace() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("ns-a".to_string()),
        Just("ns-b".to_string()),
        Just("ns-c".to_string()),
    ]
}

fn arb_allowed() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(
        prop_oneof![Just("ns-a".to_string()), Just("ns-b".to_string())],
        0..3,
    )
}

proptest! {
    #[test]
    fn validate_matches_the_matrix(
        requested in arb_namespace(),
        default_namespace in arb_namespace(),
        allowed in arb_allowed(),
    ) {
        let escalation = Escalation {
            metadata: ObjectMeta::named("esc"),
            spec: EscalationSpec {
                policy_name: "policy".to_string(),
                requestor: "alice".to_string(),
                reason: "x".to_string(),
                namespace: requested.clone(),
                ..EscalationSpec::default()
            },
            ..Escalation::default()
        };

        let grant = ValueWithKind::must_encode(
            K8S_ROLE_BINDING_KIND,
            &K8sRoleBindingGrant {
                default_namespace: default_namespace.clone(),
                allowed_namespaces: allowed.clone(),
                role_ref: RoleRef::default(),
            },
        );

        let granter = RoleBindingGranter::new(Arc::new(InertApi));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let got = runtime.block_on(granter.validate(&escalation, &grant));

        if requested.is_empty() {
            if default_namespace.is_empty() {
                prop_assert!(matches!(got, Err(GrantError::NoNamespace)));
            } else {
                prop_assert!(got.is_ok());
            }
        } else if allowed.contains(&requested) {
            prop_assert!(got.is_ok());
        } else {
            let is_namespace_not_allowed =
                matches!(got, Err(GrantError::NamespaceNotAllowed { .. }));
            prop_assert!(is_namespace_not_allowed);
        }
    }
}
