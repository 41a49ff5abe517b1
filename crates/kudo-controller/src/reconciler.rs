//! The escalation state machine.
//!
//! One controller instance handles every escalation event coming off the
//! work queue. The add path validates and parks the object in PENDING; the
//! update path dispatches on the current state, creating grants for
//! accepted escalations and reclaiming them for denied or expired ones;
//! the delete path reclaims best-effort, with the owner back-reference at
//! the storage layer as the safety net.
//!
//! All user-facing denials happen at the admission gate. The DENIED state
//! here is reserved for post-acceptance invariant violations: a policy that
//! disappeared or changed, or a tampered grant.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{error, info};

use kudo_api::{
    Escalation, EscalationGrantRef, EscalationPolicy, EscalationState, EscalationStatus,
    EscalationStatusUpdater, GrantStatus, PolicyGetter, StoreError,
};
use kudo_grant::{GrantError, GranterRegistry};

use crate::audit::AuditSink;
use crate::clock::{Clock, SystemClock};
use crate::queue::{EventHandler, EventInsight, HandlerError};

/// Details shown while an escalation waits in PENDING.
pub const PENDING_STATE_DETAILS: &str = "This escalation is being processed";

/// Details shown between acceptance and grant creation.
pub const ACCEPTED_IN_PROGRESS_STATE_DETAILS: &str =
    "This escalation has been accepted, permissions are going to be granted in a few moments";

/// Details shown once every grant is live.
pub const ACCEPTED_APPLIED_STATE_DETAILS: &str =
    "This escalation has been accepted, permissions are granted";

/// Details shown when an escalation ran out its duration.
pub const EXPIRED_STATE_DETAILS: &str =
    "This escalation has expired, all granted permissions are reclaimed";

/// Details shown when the spec is unusable.
pub const DENIED_BAD_ESCALATION_SPEC_DETAILS: &str =
    "This escalation does not have necessary information, it is denied";

/// Details shown when the referenced policy is gone.
pub const DENIED_POLICY_NOT_FOUND_STATE_DETAILS: &str =
    "This escalation references a policy that do not exist anymore, all granted permissions are reclaimed";

/// Details shown when the referenced policy changed under the escalation.
pub const DENIED_POLICY_CHANGED_STATE_DETAILS: &str =
    "This escalation references a policy that has changed, all granted permissions are reclaimed";

/// Outcome of the shared policy lookup + expiration check.
enum PolicyCheck {
    /// Policy is live and the escalation has time left.
    Proceed(EscalationPolicy),
    /// The escalation already has a settled fate; write this status.
    Settle(EscalationStatus),
}

/// Work-queue consumer driving escalation objects through their lifecycle.
pub struct EscalationController {
    policies: Arc<dyn PolicyGetter>,
    status_updater: Arc<dyn EscalationStatusUpdater>,
    granters: GranterRegistry,
    audit: Arc<dyn AuditSink>,

    clock: Arc<dyn Clock>,
    resync_interval: Duration,
    retry_interval: Duration,
}

impl EscalationController {
    /// Build a controller with the default clock and intervals.
    pub fn new(
        policies: Arc<dyn PolicyGetter>,
        status_updater: Arc<dyn EscalationStatusUpdater>,
        granters: GranterRegistry,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        EscalationController {
            policies,
            status_updater,
            granters,
            audit,
            clock: Arc::new(SystemClock),
            resync_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(5),
        }
    }

    /// Swap in a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the idle re-wakeup upper bound.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Override the partial-progress retry delay.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// The duration this escalation runs for: the requested one when
    /// positive, the policy default otherwise. The admission gate already
    /// enforced the policy maximum.
    fn effective_duration(escalation: &Escalation, policy: &EscalationPolicy) -> chrono::Duration {
        if !escalation.spec.duration.is_zero() {
            escalation.spec.duration.as_chrono()
        } else {
            policy.spec.target.default_duration.as_chrono()
        }
    }

    fn policy_changed(escalation: &Escalation, policy: &EscalationPolicy) -> bool {
        policy.uid() != escalation.status.policy_uid
            || policy.version() != escalation.status.policy_version
    }

    /// Look the policy up and settle the escalation if it is already
    /// beyond saving: missing policy or global expiration.
    async fn read_policy_and_check_expiration(
        &self,
        escalation: &Escalation,
    ) -> Result<PolicyCheck, HandlerError> {
        let policy = match self.policies.get(&escalation.spec.policy_name).await {
            Ok(policy) => policy,
            Err(err) if err.is_not_found() => {
                return Ok(PolicyCheck::Settle(
                    escalation
                        .status
                        .transition_to(EscalationState::Denied)
                        .with_details(DENIED_POLICY_NOT_FOUND_STATE_DETAILS),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(created_at) = escalation.creation_timestamp() {
            let deadline = created_at + Self::effective_duration(escalation, &policy);
            if self.clock.now() > deadline {
                return Ok(PolicyCheck::Settle(
                    escalation
                        .status
                        .transition_to(EscalationState::Expired)
                        .with_details(EXPIRED_STATE_DETAILS),
                ));
            }
        }

        Ok(PolicyCheck::Proceed(policy))
    }

    /// Write a status, emitting an update audit record when the store
    /// produced a new revision.
    async fn update_status(
        &self,
        escalation: &Escalation,
        status: EscalationStatus,
    ) -> Result<Escalation, HandlerError> {
        let updated = self.status_updater.update_status(escalation, status).await?;

        if updated.metadata.resource_version != escalation.metadata.resource_version {
            self.audit.record_update(escalation, &updated).await;
        }

        Ok(updated)
    }

    /// Compute the next status for an escalation based on its state.
    async fn reconcile_state(
        &self,
        escalation: &Escalation,
    ) -> Result<EscalationStatus, HandlerError> {
        match escalation.status.state {
            EscalationState::Pending => {
                let policy = match self.read_policy_and_check_expiration(escalation).await? {
                    PolicyCheck::Settle(status) => return Ok(status),
                    PolicyCheck::Proceed(policy) => policy,
                };

                if Self::policy_changed(escalation, &policy) {
                    return Ok(escalation
                        .status
                        .transition_to(EscalationState::Denied)
                        .with_details(DENIED_POLICY_CHANGED_STATE_DETAILS));
                }

                // Policy challenges will be evaluated here.

                let expires_at =
                    self.clock.now() + Self::effective_duration(escalation, &policy);

                Ok(escalation
                    .status
                    .transition_to(EscalationState::Accepted)
                    .with_expires_at(expires_at)
                    .with_details(ACCEPTED_IN_PROGRESS_STATE_DETAILS))
            }

            EscalationState::Accepted => {
                let policy = match self.read_policy_and_check_expiration(escalation).await? {
                    PolicyCheck::Settle(status) => return Ok(status),
                    PolicyCheck::Proceed(policy) => policy,
                };

                if Self::policy_changed(escalation, &policy) {
                    return Ok(escalation
                        .status
                        .transition_to(EscalationState::Denied)
                        .with_details(DENIED_POLICY_CHANGED_STATE_DETAILS));
                }

                Ok(self.create_grants(escalation, &policy).await)
            }

            EscalationState::Expired => {
                let (grant_refs, err) = self.reclaim_grants(escalation).await;

                match err {
                    Some(err) => Ok(escalation
                        .status
                        .transition_to(EscalationState::Expired)
                        .with_details(format!(
                            "This escalation has expired, but grants have been partially reclaimed. Reason is: {err}"
                        ))
                        .with_grant_refs(grant_refs)),
                    None => Ok(escalation
                        .status
                        .transition_to(EscalationState::Expired)
                        .with_grant_refs(grant_refs)),
                }
            }

            EscalationState::Denied => {
                let (grant_refs, err) = self.reclaim_grants(escalation).await;

                match err {
                    Some(err) => Ok(escalation
                        .status
                        .transition_to(EscalationState::Denied)
                        .with_details(format!(
                            "This escalation is denied, but grants have been partially reclaimed. Reason is: {err}"
                        ))
                        .with_grant_refs(grant_refs)),
                    None => Ok(escalation
                        .status
                        .transition_to(EscalationState::Denied)
                        .with_grant_refs(grant_refs)),
                }
            }

            state => Err(HandlerError::Terminal(format!(
                "unsupported status {state:?}, ignoring event"
            ))),
        }
    }

    /// Fan out over the policy grants, creating each through its provider.
    ///
    /// Results land positionally: slot `i` of the returned refs corresponds
    /// to grant `i`, including across partial-failure retries. The group is
    /// fail-fast: the first error aborts the surviving tasks.
    async fn create_grants(
        &self,
        escalation: &Escalation,
        policy: &EscalationPolicy,
    ) -> EscalationStatus {
        let grants = policy.spec.target.grants.clone();
        let mut grant_refs = vec![EscalationGrantRef::default(); grants.len()];

        let mut tasks: JoinSet<(usize, Result<EscalationGrantRef, GrantError>)> = JoinSet::new();

        for (i, grant) in grants.into_iter().enumerate() {
            let registry = self.granters.clone();
            let escalation = escalation.clone();

            tasks.spawn(async move {
                let result = match registry.get(grant.kind()) {
                    Ok(granter) => granter.create(&escalation, &grant).await,
                    Err(err) => Err(err),
                };
                (i, result)
            });
        }

        let first_error = Self::collect_slots(&mut tasks, &mut grant_refs).await;

        let Some(err) = first_error else {
            return escalation
                .status
                .transition_to(EscalationState::Accepted)
                .with_details(ACCEPTED_APPLIED_STATE_DETAILS)
                .with_grant_refs(grant_refs);
        };

        error!(
            escalation = %escalation.metadata.name,
            error = %err,
            "granter reports an issue while creating",
        );

        // A tampered grant fails the escalation outright; everything else
        // keeps it accepted with partial progress, retried on next wake-up.
        if err.is_tampered() {
            return escalation
                .status
                .transition_to(EscalationState::Denied)
                .with_details(format!("Escalation has been denied, reason is: {err}"));
        }

        escalation
            .status
            .transition_to(EscalationState::Accepted)
            .with_details(format!("Escalation is partially active, reason is: {err}"))
            .with_grant_refs(grant_refs)
    }

    /// Fan out over the recorded refs, reclaiming each through its
    /// provider. On any failure the original refs are kept so the retry
    /// reclaims idempotently from scratch.
    async fn reclaim_grants(
        &self,
        escalation: &Escalation,
    ) -> (Vec<EscalationGrantRef>, Option<GrantError>) {
        let current = escalation.status.grant_refs.clone();
        let mut reclaimed = current.clone();

        let mut tasks: JoinSet<(usize, Result<EscalationGrantRef, GrantError>)> = JoinSet::new();

        for (i, grant_ref) in current.iter().enumerate() {
            // A slot that never got provisioned has nothing to take back.
            if grant_ref.reference.kind().is_empty() && grant_ref.status == GrantStatus::Unknown {
                reclaimed[i] = EscalationGrantRef {
                    status: GrantStatus::Reclaimed,
                    reference: grant_ref.reference.clone(),
                };
                continue;
            }

            let registry = self.granters.clone();
            let grant_ref = grant_ref.clone();

            tasks.spawn(async move {
                let result = match registry.get(grant_ref.reference.kind()) {
                    Ok(granter) => granter.reclaim(&grant_ref).await,
                    Err(err) => Err(err),
                };
                (i, result)
            });
        }

        let first_error = Self::collect_slots(&mut tasks, &mut reclaimed).await;

        if let Some(err) = first_error {
            error!(
                escalation = %escalation.metadata.name,
                error = %err,
                "one or more reclaims have failed",
            );
            return (escalation.status.grant_refs.clone(), Some(err));
        }

        (reclaimed, None)
    }

    /// Drain a fan-out group into positional slots, aborting the survivors
    /// on the first error and reporting it.
    async fn collect_slots(
        tasks: &mut JoinSet<(usize, Result<EscalationGrantRef, GrantError>)>,
        slots: &mut [EscalationGrantRef],
    ) -> Option<GrantError> {
        let mut first_error: Option<GrantError> = None;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, Ok(reference))) => slots[i] = reference,
                Ok((_, Err(err))) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                        tasks.abort_all();
                    }
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        continue;
                    }
                    if first_error.is_none() {
                        first_error = Some(GrantError::Store(StoreError::Unavailable(format!(
                            "grant task failed: {join_err}"
                        ))));
                        tasks.abort_all();
                    }
                }
            }
        }

        first_error
    }

    /// Pick the next wake-up for an escalation whose reconcile produced no
    /// store write.
    fn next_event_insight(&self, escalation: Arc<Escalation>) -> EventInsight<Escalation> {
        match escalation.status.state {
            EscalationState::Accepted => {
                if !escalation
                    .status
                    .all_grants_in_status(GrantStatus::Created)
                {
                    return EventInsight::resync_after(self.retry_interval, escalation);
                }

                // Revisit at or before expiration.
                let mut delay = self.resync_interval;
                if let Some(expires_at) = escalation.status.expires_at {
                    let to_expiry = (expires_at - self.clock.now())
                        .to_std()
                        .unwrap_or(Duration::ZERO);
                    delay = delay.min(to_expiry);
                }

                EventInsight::resync_after(delay, escalation)
            }

            EscalationState::Denied | EscalationState::Expired => {
                if !escalation
                    .status
                    .all_grants_in_status(GrantStatus::Reclaimed)
                {
                    return EventInsight::resync_after(self.retry_interval, escalation);
                }

                info!(
                    escalation = %escalation.metadata.name,
                    "not resyncing: terminal state with everything reclaimed",
                );
                EventInsight::none()
            }

            _ => EventInsight::none(),
        }
    }
}

#[async_trait]
impl EventHandler<Escalation> for EscalationController {
    async fn on_add(
        &self,
        escalation: Arc<Escalation>,
    ) -> Result<EventInsight<Escalation>, HandlerError> {
        self.audit.record_create(&escalation).await;

        if !escalation.spec.is_valid() {
            self.update_status(
                &escalation,
                escalation
                    .status
                    .transition_to(EscalationState::Denied)
                    .with_details(DENIED_BAD_ESCALATION_SPEC_DETAILS),
            )
            .await?;

            return Ok(EventInsight::none());
        }

        match self.read_policy_and_check_expiration(&escalation).await? {
            PolicyCheck::Settle(status) => {
                self.update_status(&escalation, status).await?;
            }
            PolicyCheck::Proceed(policy) => {
                let status = escalation
                    .status
                    .transition_to(EscalationState::Pending)
                    .with_details(PENDING_STATE_DETAILS)
                    .with_policy_info(policy.uid(), policy.version());

                self.update_status(&escalation, status).await?;
            }
        }

        Ok(EventInsight::none())
    }

    async fn on_update(
        &self,
        _old: Arc<Escalation>,
        new: Arc<Escalation>,
    ) -> Result<EventInsight<Escalation>, HandlerError> {
        let status = self.reconcile_state(&new).await?;
        let updated = self.update_status(&new, status).await?;

        // A changed revision means an update event is already on its way;
        // no need to schedule anything.
        if new.metadata.resource_version != updated.metadata.resource_version {
            return Ok(EventInsight::none());
        }

        let insight = self.next_event_insight(Arc::new(updated));

        if let Some(delay) = insight.resync_after {
            info!(
                escalation = %new.metadata.name,
                delay_ms = delay.as_millis() as u64,
                "next processing scheduled",
            );
        }

        Ok(insight)
    }

    async fn on_delete(
        &self,
        escalation: Arc<Escalation>,
    ) -> Result<EventInsight<Escalation>, HandlerError> {
        info!(
            escalation = %escalation.metadata.name,
            "escalation deleted, reclaiming permissions",
        );

        self.audit.record_delete(&escalation).await;

        // Best effort: the owner reference on each grant makes the storage
        // layer finish the job if we cannot.
        let (_, err) = self.reclaim_grants(&escalation).await;
        if let Some(err) = err {
            error!(
                escalation = %escalation.metadata.name,
                error = %err,
                "reclaim on delete failed, relying on owner references",
            );
        }

        Ok(EventInsight::none())
    }
}
