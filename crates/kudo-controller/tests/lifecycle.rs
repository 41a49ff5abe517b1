//! End-to-end escalation lifecycle against an in-memory cluster.
//!
//! The fake cluster feeds status writes back into the work queue the way
//! the real watch plumbing would, and the clock is manual, so the full
//! PENDING -> ACCEPTED -> granted -> EXPIRED -> reclaimed run is
//! deterministic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::time::{sleep, timeout};

use kudo_api::rbac::{RoleBinding, RoleRef, Subject, RBAC_GROUP};
use kudo_api::{
    Escalation, EscalationPolicy, EscalationPolicySpec, EscalationSpec, EscalationState,
    EscalationStatus, EscalationStatusUpdater, EscalationTarget, GrantStatus, HumanDuration,
    ObjectMeta, PolicyGetter, StoreError, ValueWithKind,
};
use kudo_controller::{
    AuditSink, Clock, EscalationController, Event, ManualClock, QueuedEventHandler,
};
use kudo_grant::{
    GranterRegistry, K8sRoleBindingGrant, RoleBindingApi, RoleBindingGranter,
    K8S_ROLE_BINDING_KIND,
};

/// In-memory policies + escalations + role bindings, wired to the queue.
#[derive(Default)]
struct FakeCluster {
    state: Mutex<ClusterState>,
    queue: OnceLock<Arc<QueuedEventHandler<Escalation>>>,
}

#[derive(Default)]
struct ClusterState {
    policies: HashMap<String, EscalationPolicy>,
    escalations: HashMap<String, Escalation>,
    bindings: HashMap<(String, String), RoleBinding>,
    serial: u64,
}

impl FakeCluster {
    fn attach_queue(&self, queue: Arc<QueuedEventHandler<Escalation>>) {
        self.queue.set(queue).ok().expect("queue attached twice");
    }

    fn put_policy(&self, policy: EscalationPolicy) {
        let mut state = self.state.lock().unwrap();
        state.policies.insert(policy.metadata.name.clone(), policy);
    }

    /// Store a new escalation and deliver the add event, like the watch
    /// plumbing would after a successful admission.
    fn create_escalation(&self, mut escalation: Escalation) {
        let stored = {
            let mut state = self.state.lock().unwrap();
            state.serial += 1;
            escalation.metadata.uid = format!("esc-uid-{}", state.serial);
            escalation.metadata.resource_version = state.serial.to_string();
            state
                .escalations
                .insert(escalation.metadata.name.clone(), escalation.clone());
            escalation
        };

        self.queue
            .get()
            .expect("queue not attached")
            .enqueue(Event::Add(Arc::new(stored)));
    }

    fn escalation(&self, name: &str) -> Escalation {
        self.state.lock().unwrap().escalations[name].clone()
    }

    fn binding_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<_> = state
            .bindings
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.state
            .lock()
            .unwrap()
            .bindings
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PolicyGetter for FakeCluster {
    async fn get(&self, name: &str) -> Result<EscalationPolicy, StoreError> {
        self.state
            .lock()
            .unwrap()
            .policies
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl EscalationStatusUpdater for FakeCluster {
    async fn update_status(
        &self,
        escalation: &Escalation,
        status: EscalationStatus,
    ) -> Result<Escalation, StoreError> {
        let (old, updated) = {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .escalations
                .get(&escalation.metadata.name)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    name: escalation.metadata.name.clone(),
                })?;

            // Optimistic concurrency: a stale revision loses the race.
            if stored.metadata.resource_version != escalation.metadata.resource_version {
                return Err(StoreError::Conflict {
                    name: escalation.metadata.name.clone(),
                });
            }

            // A no-op write leaves the revision alone.
            if stored.status == status {
                return Ok(stored);
            }

            state.serial += 1;
            let mut updated = stored.clone();
            updated.status = status;
            updated.metadata.resource_version = state.serial.to_string();
            state
                .escalations
                .insert(updated.metadata.name.clone(), updated.clone());

            (stored, updated)
        };

        self.queue.get().expect("queue not attached").enqueue(Event::Update {
            old: Arc::new(old),
            new: Arc::new(updated.clone()),
        });

        Ok(updated)
    }
}

#[async_trait]
impl RoleBindingApi for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<RoleBinding>, StoreError> {
        Ok(self.binding(namespace, name))
    }

    async fn create(&self, mut binding: RoleBinding) -> Result<RoleBinding, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.serial += 1;

        if binding.metadata.name.is_empty() {
            binding.metadata.name = format!("{}{}", binding.metadata.generate_name, state.serial);
        }
        binding.metadata.uid = format!("rb-uid-{}", state.serial);
        binding.metadata.resource_version = state.serial.to_string();

        state.bindings.insert(
            (binding.namespace.clone(), binding.metadata.name.clone()),
            binding.clone(),
        );
        Ok(binding)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state
            .bindings
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }
}

#[derive(Default)]
struct TrailAudit {
    records: Mutex<Vec<String>>,
}

impl TrailAudit {
    fn trail(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for TrailAudit {
    async fn record_create(&self, _escalation: &Escalation) {
        self.records.lock().unwrap().push("Create".to_string());
    }

    async fn record_update(&self, _old: &Escalation, new: &Escalation) {
        self.records
            .lock()
            .unwrap()
            .push(format!("Update:{}", new.status.state));
    }

    async fn record_delete(&self, _escalation: &Escalation) {
        self.records.lock().unwrap().push("Delete".to_string());
    }
}

struct Runtime {
    cluster: Arc<FakeCluster>,
    audit: Arc<TrailAudit>,
    clock: Arc<ManualClock>,
    queue: Arc<QueuedEventHandler<Escalation>>,
    runner: tokio::task::JoinHandle<()>,
}

fn start_runtime() -> Runtime {
    let cluster = Arc::new(FakeCluster::default());
    let audit = Arc::new(TrailAudit::default());
    let clock = Arc::new(ManualClock::starting_at(
        Utc.with_ymd_and_hms(2022, 10, 10, 12, 0, 0).unwrap(),
    ));

    let registry = GranterRegistry::new().with(
        K8S_ROLE_BINDING_KIND,
        Arc::new(RoleBindingGranter::new(cluster.clone())),
    );

    let controller = EscalationController::new(
        cluster.clone(),
        cluster.clone(),
        registry,
        audit.clone(),
    )
    .with_clock(clock.clone())
    .with_resync_interval(Duration::from_millis(30))
    .with_retry_interval(Duration::from_millis(10));

    let queue = QueuedEventHandler::new(Arc::new(controller), "escalations");
    cluster.attach_queue(queue.clone());

    let runner = tokio::spawn(Arc::clone(&queue).run(2));

    Runtime {
        cluster,
        audit,
        clock,
        queue,
        runner,
    }
}

fn test_policy(default_secs: u64) -> EscalationPolicy {
    EscalationPolicy {
        metadata: ObjectMeta {
            name: "policy-p".to_string(),
            uid: "policy-p-uid".to_string(),
            resource_version: "1".to_string(),
            ..ObjectMeta::default()
        },
        spec: EscalationPolicySpec {
            subjects: vec![Subject::user("u")],
            challenges: vec![],
            target: EscalationTarget {
                default_duration: HumanDuration::from_secs(default_secs),
                max_duration: HumanDuration::from_secs(3600),
                grants: vec![ValueWithKind::must_encode(
                    K8S_ROLE_BINDING_KIND,
                    &K8sRoleBindingGrant {
                        default_namespace: String::new(),
                        allowed_namespaces: vec!["ns-1".to_string()],
                        role_ref: RoleRef {
                            api_group: RBAC_GROUP.to_string(),
                            kind: "Role".to_string(),
                            name: "r".to_string(),
                        },
                    },
                )],
            },
        },
    }
}

fn test_escalation(duration: HumanDuration, created_at: chrono::DateTime<Utc>) -> Escalation {
    Escalation {
        metadata: ObjectMeta {
            name: "escalation-e".to_string(),
            creation_timestamp: Some(created_at),
            ..ObjectMeta::default()
        },
        spec: EscalationSpec {
            policy_name: "policy-p".to_string(),
            requestor: "u".to_string(),
            reason: "x".to_string(),
            namespace: "ns-1".to_string(),
            duration,
        },
        status: EscalationStatus::default(),
    }
}

async fn wait_until(what: &str, mut predicate: impl FnMut() -> bool) {
    timeout(Duration::from_secs(10), async {
        loop {
            if predicate() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escalation_runs_its_full_lifecycle() {
    let rt = start_runtime();
    rt.cluster.put_policy(test_policy(5));

    rt.cluster
        .create_escalation(test_escalation(HumanDuration::ZERO, rt.clock.now()));

    // Permissions come up.
    wait_until("escalation granted", || {
        let esc = rt.cluster.escalation("escalation-e");
        esc.status.state == EscalationState::Accepted
            && esc.status.all_grants_in_status(GrantStatus::Created)
    })
    .await;

    // Exactly one binding in ns-1, for user u, referencing Role/r.
    let names = rt.cluster.binding_names("ns-1");
    assert_eq!(names.len(), 1);
    let binding = rt.cluster.binding("ns-1", &names[0]).unwrap();
    assert_eq!(binding.subjects, vec![Subject::user("u")]);
    assert_eq!(binding.role_ref.kind, "Role");
    assert_eq!(binding.role_ref.name, "r");
    assert_eq!(
        binding.metadata.owner_references[0].name,
        "escalation-e".to_string()
    );

    let esc = rt.cluster.escalation("escalation-e");
    assert_eq!(
        esc.status.expires_at,
        Some(rt.clock.now() + chrono::Duration::seconds(5))
    );

    // The default duration runs out.
    rt.clock.advance(chrono::Duration::seconds(6));

    wait_until("escalation reclaimed", || {
        let esc = rt.cluster.escalation("escalation-e");
        esc.status.state == EscalationState::Expired
            && esc.status.all_grants_in_status(GrantStatus::Reclaimed)
    })
    .await;

    // The binding is gone.
    assert!(rt.cluster.binding_names("ns-1").is_empty());

    // Audit trail in order: create, pending, accepted (granting), accepted
    // (granted), expired (marked), expired (reclaimed).
    wait_until("audit trail complete", || rt.audit.trail().len() >= 6).await;
    assert_eq!(
        rt.audit.trail()[..6],
        [
            "Create".to_string(),
            "Update:PENDING".to_string(),
            "Update:ACCEPTED".to_string(),
            "Update:ACCEPTED".to_string(),
            "Update:EXPIRED".to_string(),
            "Update:EXPIRED".to_string(),
        ]
    );

    rt.queue.shutdown();
    let _ = rt.runner.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duration_override_expires_early() {
    let rt = start_runtime();
    rt.cluster.put_policy(test_policy(300));

    let created_at = rt.clock.now();
    rt.cluster
        .create_escalation(test_escalation(HumanDuration::from_secs(2), created_at));

    wait_until("escalation granted", || {
        let esc = rt.cluster.escalation("escalation-e");
        esc.status.state == EscalationState::Accepted
            && esc.status.all_grants_in_status(GrantStatus::Created)
    })
    .await;

    let esc = rt.cluster.escalation("escalation-e");
    assert_eq!(
        esc.status.expires_at,
        Some(created_at + chrono::Duration::seconds(2))
    );

    // Two seconds later the override wins over the 5 minute default.
    rt.clock.advance(chrono::Duration::seconds(3));

    wait_until("escalation expired", || {
        rt.cluster.escalation("escalation-e").status.state == EscalationState::Expired
    })
    .await;

    rt.queue.shutdown();
    let _ = rt.runner.await;
}
