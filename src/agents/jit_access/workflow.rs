//! JIT access workflow
//!
//! Owns every transition of a [`JitAccessRequest`]. `run` is the long-lived
//! execution: grant, hold, revoke. Its whole lifetime is bounded by the
//! ceiling, and every exit path goes through the same revoke call. `resume`
//! picks up a request granted by an earlier process.
//!
//! Every transition is saved to the store before it becomes visible, and
//! `grant_attempted` is saved before the provisioner is called.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::provisioner::AssignmentProvisioner;
use super::store::JitStore;
use super::types::{
    GrantResult, JitAccessRequest, JitError, JitState, RevocationReason, RevokeResult, RunOutcome,
};
use crate::tools::alert::{Alert, Alerter};

const MAX_REVOKE_BACKOFF: Duration = Duration::from_secs(30);

/// Failed revoke attempts before the operator is alerted; retries go on
pub const ALERT_AFTER_FAILED_REVOKES: u32 = 3;

/// Timing and admission rules
#[derive(Debug, Clone)]
pub struct JitPolicy {
    /// How long the elevated assignment is held
    pub hold: Duration,
    /// Hard bound on the whole execution, grant to confirmed revoke
    pub ceiling: Duration,
    /// Time kept free before the ceiling for revoke retries
    pub revoke_budget: Duration,
    /// Permission sets that may be requested; `None` allows any
    pub allowed_permission_sets: Option<HashSet<String>>,
}

impl Default for JitPolicy {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(30 * 60),
            ceiling: Duration::from_secs(2 * 60 * 60),
            revoke_budget: Duration::from_secs(5 * 60),
            allowed_permission_sets: None,
        }
    }
}

impl JitPolicy {
    pub fn validate(&self) -> Result<(), JitError> {
        if self.hold.is_zero() {
            return Err(JitError::Validation("hold must be positive".to_string()));
        }
        if self.ceiling <= self.hold {
            return Err(JitError::Validation(format!(
                "ceiling ({:?}) must exceed hold ({:?})",
                self.ceiling, self.hold
            )));
        }
        if self.revoke_budget >= self.ceiling {
            return Err(JitError::Validation(
                "revoke budget must be shorter than the ceiling".to_string(),
            ));
        }
        Ok(())
    }
}

fn required(field: &str, value: &str) -> Result<(), JitError> {
    if value.trim().is_empty() {
        return Err(JitError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Exponential backoff starting at 200ms
fn revoke_backoff(attempt: u32) -> Duration {
    let backoff = Duration::from_millis(200u64.saturating_mul(1u64 << attempt.min(16)));
    backoff.min(MAX_REVOKE_BACKOFF)
}

pub struct JitWorkflow {
    store: Arc<JitStore>,
    provisioner: Arc<dyn AssignmentProvisioner>,
    alerter: Arc<dyn Alerter>,
    policy: JitPolicy,
}

impl JitWorkflow {
    pub fn new(
        store: Arc<JitStore>,
        provisioner: Arc<dyn AssignmentProvisioner>,
        alerter: Arc<dyn Alerter>,
        policy: JitPolicy,
    ) -> Result<Self, JitError> {
        policy.validate()?;
        Ok(Self {
            store,
            provisioner,
            alerter,
            policy,
        })
    }

    pub fn policy(&self) -> &JitPolicy {
        &self.policy
    }

    pub async fn get(&self, request_id: &Uuid) -> Result<JitAccessRequest, JitError> {
        self.store
            .get(request_id)
            .await
            .ok_or(JitError::NotFound(*request_id))
    }

    /// Another request that holds the same (requester, permission set)
    /// assignment
    pub async fn assignment_holder(&self, request: &JitAccessRequest) -> Option<Uuid> {
        self.store
            .assignment_holder(
                &request.requester,
                &request.target_permission_set,
                &request.request_id,
            )
            .await
    }

    /// Requests left granted, or possibly granted, by an earlier process
    pub async fn pending_revokes(&self) -> Vec<JitAccessRequest> {
        self.store.pending_revokes().await
    }

    /// Forget revoked requests older than `cutoff`, except those in `keep`
    pub async fn prune(&self, cutoff: DateTime<Utc>, keep: &HashSet<Uuid>) -> usize {
        match self.store.prune(cutoff, keep).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to save JIT state after pruning");
                0
            }
        }
    }

    async fn persist(&self, request: &JitAccessRequest) -> Result<(), JitError> {
        self.store
            .save(request)
            .await
            .map_err(|e| JitError::Persistence(format!("{:#}", e)))
    }

    /// Save after the provider call already happened. Memory stays
    /// authoritative; the next successful save writes this state too.
    async fn persist_logged(&self, request: &JitAccessRequest) {
        if let Err(e) = self.persist(request).await {
            error!(request = %request.request_id, error = %e, "JIT state not saved");
        }
    }

    /// Record a new request in `Requested`
    pub async fn submit(
        &self,
        requester: &str,
        target_permission_set: &str,
        justification: &str,
    ) -> Result<JitAccessRequest, JitError> {
        required("requester", requester)?;
        required("targetPermissionSet", target_permission_set)?;
        required("justification", justification)?;

        if let Some(allowed) = &self.policy.allowed_permission_sets {
            if !allowed.contains(target_permission_set) {
                return Err(JitError::Validation(format!(
                    "permission set {} is not eligible for JIT access",
                    target_permission_set
                )));
            }
        }

        let request = JitAccessRequest::new(requester, target_permission_set, justification);
        if let Some(holder) = self.assignment_holder(&request).await {
            return Err(JitError::Conflict(format!(
                "request {} already holds {} for {}",
                holder, target_permission_set, requester
            )));
        }

        self.store
            .insert(request.clone())
            .await
            .map_err(|e| JitError::Persistence(format!("{:#}", e)))?;
        info!(
            request = %request.request_id,
            requester = %request.requester,
            permission_set = %request.target_permission_set,
            "JIT request submitted"
        );
        Ok(request)
    }

    pub async fn approve(
        &self,
        request_id: &Uuid,
        approver: &str,
    ) -> Result<JitAccessRequest, JitError> {
        required("approver", approver)?;
        let entry = self
            .store
            .entry(request_id)
            .await
            .ok_or(JitError::NotFound(*request_id))?;
        let mut request = entry.lock().await;

        if request.state != JitState::Requested {
            return Err(JitError::InvalidTransition {
                request_id: *request_id,
                from: request.state,
                action: "approve",
            });
        }
        if request.requester == approver {
            return Err(JitError::Validation(
                "requester cannot approve their own request".to_string(),
            ));
        }

        let mut approved = request.clone();
        approved.state = JitState::ManagerApproved;
        approved.approved_by = Some(approver.to_string());
        self.persist(&approved).await?;
        *request = approved;
        info!(request = %request_id, approver = %approver, "JIT request approved");
        Ok(request.clone())
    }

    /// Provision the assignment. Granting twice provisions once.
    pub async fn grant(&self, request_id: &Uuid) -> Result<GrantResult, JitError> {
        let entry = self
            .store
            .entry(request_id)
            .await
            .ok_or(JitError::NotFound(*request_id))?;
        let mut request = entry.lock().await;

        match request.state {
            JitState::Granted => return Ok(GrantResult { granted: true }),
            JitState::ManagerApproved => {}
            from => {
                return Err(JitError::InvalidTransition {
                    request_id: *request_id,
                    from,
                    action: "grant",
                })
            }
        }

        if !request.grant_attempted {
            let mut attempted = request.clone();
            attempted.grant_attempted = true;
            self.persist(&attempted).await?;
            *request = attempted;
        }

        if let Err(e) = self.provisioner.assign(&request).await {
            let err = JitError::from(e);
            warn!(request = %request_id, error = %err, "Grant failed");
            request.last_error = Some(err.to_string());
            self.persist_logged(&request).await;
            return Err(err);
        }

        let granted_at = Utc::now();
        request.state = JitState::Granted;
        request.granted_at = Some(granted_at);
        request.expires_at = chrono::Duration::from_std(self.policy.hold)
            .ok()
            .map(|hold| granted_at + hold);
        request.last_error = None;
        self.persist_logged(&request).await;

        info!(
            request = %request_id,
            expires_at = ?request.expires_at,
            "JIT access granted"
        );
        Ok(GrantResult { granted: true })
    }

    /// Remove the assignment. A request that is already revoked, or was never
    /// provisioned, reports `revoked: false` and is left as is.
    pub async fn revoke(
        &self,
        request_id: &Uuid,
        reason: RevocationReason,
    ) -> Result<RevokeResult, JitError> {
        let entry = self
            .store
            .entry(request_id)
            .await
            .ok_or(JitError::NotFound(*request_id))?;
        let mut request = entry.lock().await;

        if request.state == JitState::Revoked || !request.grant_attempted {
            return Ok(RevokeResult { revoked: false });
        }

        if let Err(e) = self.provisioner.unassign(&request).await {
            let err = JitError::from(e);
            request.last_error = Some(err.to_string());
            return Err(err);
        }

        request.state = JitState::Revoked;
        request.revoked_at = Some(Utc::now());
        request.revocation_reason = Some(reason);
        request.last_error = None;
        self.persist_logged(&request).await;
        info!(request = %request_id, reason = ?reason, "JIT access revoked");
        Ok(RevokeResult { revoked: true })
    }

    /// Grant, hold, revoke.
    ///
    /// The hold ends at the first of: hold elapsed, a value on `cancel`, or
    /// the ceiling minus the revoke budget. Revoke is retried with backoff
    /// until the ceiling. The operator is alerted once revokes keep failing
    /// and again if the ceiling passes without one succeeding.
    pub async fn run(
        &self,
        request_id: Uuid,
        cancel: oneshot::Receiver<RevocationReason>,
    ) -> RunOutcome {
        let started = Instant::now();
        let deadline = started + self.policy.ceiling;
        let hold_cap = deadline
            .checked_sub(self.policy.revoke_budget)
            .unwrap_or(started);

        let reason = match timeout_at(hold_cap, self.grant(&request_id)).await {
            Ok(Ok(_)) => {
                let hold_end = Instant::now() + self.policy.hold;
                if hold_end > hold_cap {
                    hold_until(hold_cap, RevocationReason::CeilingReached, cancel).await
                } else {
                    hold_until(hold_end, RevocationReason::HoldElapsed, cancel).await
                }
            }
            Ok(Err(e @ (JitError::NotFound(_) | JitError::InvalidTransition { .. }))) => {
                warn!(request = %request_id, error = %e, "JIT run not started");
                return RunOutcome::Aborted {
                    error: e.to_string(),
                };
            }
            Ok(Err(_)) => RevocationReason::GrantFailed,
            Err(_) => {
                warn!(request = %request_id, "Grant did not finish before the ceiling");
                RevocationReason::CeilingReached
            }
        };

        self.revoke_before(request_id, reason, deadline).await
    }

    /// Re-arm a request granted by an earlier process: hold for whatever is
    /// left until `expires_at` (nothing, if it has passed), then revoke. A
    /// request whose grant was attempted but never confirmed is revoked at
    /// once.
    pub async fn resume(
        &self,
        request_id: Uuid,
        cancel: oneshot::Receiver<RevocationReason>,
    ) -> RunOutcome {
        let request = match self.get(&request_id).await {
            Ok(request) => request,
            Err(e) => {
                return RunOutcome::Aborted {
                    error: e.to_string(),
                }
            }
        };

        let reason = match request.state {
            JitState::Granted => {
                let remaining = request
                    .expires_at
                    .and_then(|at| (at - Utc::now()).to_std().ok())
                    .unwrap_or(Duration::ZERO)
                    .min(self.policy.hold);
                info!(request = %request_id, remaining_secs = %remaining.as_secs(), "Resuming JIT hold");
                if remaining.is_zero() {
                    RevocationReason::HoldElapsed
                } else {
                    hold_until(Instant::now() + remaining, RevocationReason::HoldElapsed, cancel).await
                }
            }
            _ => RevocationReason::GrantFailed,
        };

        let window = self
            .policy
            .ceiling
            .saturating_sub(self.policy.hold)
            .max(self.policy.revoke_budget);
        self.revoke_before(request_id, reason, Instant::now() + window).await
    }

    async fn revoke_before(
        &self,
        request_id: Uuid,
        reason: RevocationReason,
        deadline: Instant,
    ) -> RunOutcome {
        info!(request = %request_id, reason = ?reason, "Hold ended, revoking");

        let result = timeout_at(deadline, self.revoke_with_retry(&request_id, reason)).await;
        let error = match result {
            Ok(Ok(RevokeResult { revoked: true })) => return RunOutcome::Revoked { reason },
            Ok(Ok(RevokeResult { revoked: false })) => {
                return RunOutcome::NothingToRevoke { reason }
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "revoke did not complete before the ceiling".to_string(),
        };

        let escalated = JitError::RevokeEscalated {
            request_id,
            message: error,
        };
        error!(request = %request_id, error = %escalated, "JIT revoke failed, escalating");
        self.alert(&request_id, reason, escalated.to_string()).await;

        RunOutcome::RevokeFailed {
            reason,
            error: escalated.to_string(),
        }
    }

    async fn revoke_with_retry(
        &self,
        request_id: &Uuid,
        reason: RevocationReason,
    ) -> Result<RevokeResult, JitError> {
        let mut failures: u32 = 0;
        loop {
            match self.revoke(request_id, reason).await {
                Err(JitError::Provisioning(message)) => {
                    let backoff = revoke_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        request = %request_id,
                        attempt = %failures,
                        backoff_ms = %backoff.as_millis(),
                        error = %message,
                        "Revoke failed, retrying"
                    );
                    if failures == ALERT_AFTER_FAILED_REVOKES {
                        self.alert(
                            request_id,
                            reason,
                            format!(
                                "Revoke of request {} failed {} times, still retrying: {}",
                                request_id, failures, message
                            ),
                        )
                        .await;
                    }
                    sleep(backoff).await;
                }
                Ok(result) if failures >= ALERT_AFTER_FAILED_REVOKES => {
                    info!(request = %request_id, attempts = %(failures + 1), "Revoke succeeded after alert");
                    return Ok(result);
                }
                other => return other,
            }
        }
    }

    async fn alert(&self, request_id: &Uuid, reason: RevocationReason, summary: String) {
        let snapshot = self.store.get(request_id).await;
        let alert = Alert::new("jit_access", summary)
            .subject(request_id.to_string())
            .details(json!({
                "reason": reason,
                "request": snapshot,
            }));

        if let Err(e) = self.alerter.raise(&alert).await {
            error!(request = %request_id, error = %e, "Failed to deliver revoke alert");
        }
    }
}

/// Wait until `until`, or return early with the cancel reason.
/// A dropped sender is not a cancel.
async fn hold_until(
    until: Instant,
    elapsed: RevocationReason,
    cancel: oneshot::Receiver<RevocationReason>,
) -> RevocationReason {
    let cancelled = async {
        match cancel.await {
            Ok(reason) => reason,
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = sleep_until(until) => elapsed,
        reason = cancelled => reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::jit_access::provisioner::testing::FakeProvisioner;
    use crate::tools::alert::testing::RecordingAlerter;
    use tempfile::TempDir;

    const PS: &str = "arn:aws:sso:::permissionSet/ssoins-1/ps-admin";
    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        workflow: JitWorkflow,
        store: Arc<JitStore>,
        provisioner: Arc<FakeProvisioner>,
        alerter: Arc<RecordingAlerter>,
    }

    fn harness(provisioner: FakeProvisioner, policy: JitPolicy) -> Harness {
        harness_with_store(JitStore::new(), provisioner, policy)
    }

    fn harness_with_store(store: JitStore, provisioner: FakeProvisioner, policy: JitPolicy) -> Harness {
        let store = Arc::new(store);
        let provisioner = Arc::new(provisioner);
        let alerter = Arc::new(RecordingAlerter::default());
        let workflow = JitWorkflow::new(store.clone(), provisioner.clone(), alerter.clone(), policy)
            .unwrap();
        Harness {
            workflow,
            store,
            provisioner,
            alerter,
        }
    }

    /// A request some earlier process granted, expiring `expires_in` from now
    fn granted_earlier(expires_in: chrono::Duration) -> JitAccessRequest {
        let mut req = JitAccessRequest::new("u-alice", PS, "incident 42");
        let now = Utc::now();
        req.state = JitState::Granted;
        req.approved_by = Some("u-manager".to_string());
        req.grant_attempted = true;
        req.granted_at = Some(now + expires_in - chrono::Duration::minutes(30));
        req.expires_at = Some(now + expires_in);
        req
    }

    async fn approved(h: &Harness) -> Uuid {
        let req = h.workflow.submit("u-alice", PS, "incident 42").await.unwrap();
        h.workflow.approve(&req.request_id, "u-manager").await.unwrap();
        req.request_id
    }

    #[test]
    fn test_policy_validation() {
        assert!(JitPolicy::default().validate().is_ok());
        let bad = JitPolicy {
            ceiling: 30 * MINUTE,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(revoke_backoff(0), Duration::from_millis(200));
        assert_eq!(revoke_backoff(3), Duration::from_millis(1600));
        assert_eq!(revoke_backoff(40), MAX_REVOKE_BACKOFF);
    }

    #[tokio::test]
    async fn test_submit_requires_fields() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let err = h.workflow.submit("u-alice", PS, "  ").await.unwrap_err();
        assert!(matches!(err, JitError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_checks_allow_list() {
        let policy = JitPolicy {
            allowed_permission_sets: Some(HashSet::from([PS.to_string()])),
            ..Default::default()
        };
        let h = harness(FakeProvisioner::default(), policy);

        assert!(h.workflow.submit("u-alice", PS, "why").await.is_ok());
        let err = h
            .workflow
            .submit("u-alice", "arn:aws:sso:::permissionSet/ssoins-1/ps-other", "why")
            .await
            .unwrap_err();
        assert!(matches!(err, JitError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_refused_while_pair_is_granted() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let id = approved(&h).await;
        h.workflow.grant(&id).await.unwrap();

        let err = h.workflow.submit("u-alice", PS, "second incident").await.unwrap_err();
        assert!(matches!(err, JitError::Conflict(_)));
        assert!(err.to_string().contains(&id.to_string()));

        // other users and other permission sets are unaffected
        assert!(h.workflow.submit("u-bob", PS, "why").await.is_ok());
        h.workflow.revoke(&id, RevocationReason::Manual).await.unwrap();
        assert!(h.workflow.submit("u-alice", PS, "after revoke").await.is_ok());
    }

    #[tokio::test]
    async fn test_requester_cannot_self_approve() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let req = h.workflow.submit("u-alice", PS, "why").await.unwrap();

        let err = h.workflow.approve(&req.request_id, "u-alice").await.unwrap_err();
        assert!(matches!(err, JitError::Validation(_)));
        assert_eq!(
            h.workflow.get(&req.request_id).await.unwrap().state,
            JitState::Requested
        );
    }

    #[tokio::test]
    async fn test_grant_requires_approval() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let req = h.workflow.submit("u-alice", PS, "why").await.unwrap();

        let err = h.workflow.grant(&req.request_id).await.unwrap_err();
        assert!(matches!(err, JitError::InvalidTransition { .. }));
        assert_eq!(h.provisioner.assign_count(), 0);
    }

    #[tokio::test]
    async fn test_grant_and_revoke_are_idempotent() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let id = approved(&h).await;

        assert!(h.workflow.grant(&id).await.unwrap().granted);
        assert!(h.workflow.grant(&id).await.unwrap().granted);
        assert_eq!(h.provisioner.assign_count(), 1);

        let req = h.workflow.get(&id).await.unwrap();
        assert_eq!(req.state, JitState::Granted);
        assert!(h.provisioner.assigned(&req));
        assert_eq!(
            req.expires_at.unwrap() - req.granted_at.unwrap(),
            chrono::Duration::minutes(30)
        );

        let first = h.workflow.revoke(&id, RevocationReason::Manual).await.unwrap();
        let second = h.workflow.revoke(&id, RevocationReason::Manual).await.unwrap();
        assert!(first.revoked);
        assert!(!second.revoked);
        assert_eq!(h.provisioner.unassign_count(), 1);
        assert!(!h.provisioner.assigned(&req));
    }

    #[tokio::test]
    async fn test_revoke_never_granted_is_noop() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let id = approved(&h).await;

        let result = h.workflow.revoke(&id, RevocationReason::Manual).await.unwrap();
        assert!(!result.revoked);
        assert_eq!(h.provisioner.unassign_count(), 0);
        assert_eq!(h.workflow.get(&id).await.unwrap().state, JitState::ManagerApproved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_revokes_after_hold() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let id = approved(&h).await;
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let outcome = h.workflow.run(id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::HoldElapsed
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= 30 * MINUTE && elapsed < 31 * MINUTE);
        assert_eq!(h.provisioner.assign_count(), 1);
        assert_eq!(h.provisioner.unassign_count(), 1);

        let req = h.workflow.get(&id).await.unwrap();
        assert_eq!(req.state, JitState::Revoked);
        assert_eq!(req.revocation_reason, Some(RevocationReason::HoldElapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_revokes_early() {
        let h = Arc::new(harness(FakeProvisioner::default(), JitPolicy::default()));
        let id = approved(&h).await;
        let (tx, rx) = oneshot::channel();

        let runner = {
            let h = h.clone();
            tokio::spawn(async move { h.workflow.run(id, rx).await })
        };

        let started = Instant::now();
        sleep(5 * MINUTE).await;
        tx.send(RevocationReason::Cancelled).unwrap();
        let outcome = runner.await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::Cancelled
            }
        );
        assert!(started.elapsed() < 6 * MINUTE);
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_grant_is_cut_at_ceiling() {
        let provisioner = FakeProvisioner {
            assign_delay: Some(100 * MINUTE),
            ..Default::default()
        };
        let h = harness(provisioner, JitPolicy::default());
        let id = approved(&h).await;
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let outcome = h.workflow.run(id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::CeilingReached
            }
        );
        assert!(started.elapsed() <= 120 * MINUTE);
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_grant_still_revokes() {
        let provisioner = FakeProvisioner {
            fail_assign: true,
            ..Default::default()
        };
        let h = harness(provisioner, JitPolicy::default());
        let id = approved(&h).await;
        let (_tx, rx) = oneshot::channel();

        let outcome = h.workflow.run(id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::GrantFailed
            }
        );
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_past_ceiling_is_cut_short() {
        let policy = JitPolicy {
            hold: 119 * MINUTE,
            ceiling: 120 * MINUTE,
            revoke_budget: 5 * MINUTE,
            ..Default::default()
        };
        let h = harness(FakeProvisioner::default(), policy);
        let id = approved(&h).await;
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let outcome = h.workflow.run(id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::CeilingReached
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= 115 * MINUTE && elapsed < 116 * MINUTE);
        assert_eq!(
            h.workflow.get(&id).await.unwrap().revocation_reason,
            Some(RevocationReason::CeilingReached)
        );
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoke_failure_alerts_operator() {
        let provisioner = FakeProvisioner {
            fail_unassign: true,
            ..Default::default()
        };
        let h = Arc::new(harness(provisioner, JitPolicy::default()));
        let id = approved(&h).await;
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let runner = {
            let h = h.clone();
            tokio::spawn(async move { h.workflow.run(id, rx).await })
        };

        // shortly after the hold ends the operator already knows
        sleep(31 * MINUTE).await;
        assert_eq!(h.alerter.count(), 1);
        let early = h.alerter.alerts.lock().unwrap()[0].clone();
        assert_eq!(early.source, "jit_access");
        assert_eq!(early.subject, Some(id.to_string()));
        assert!(early.summary.contains("still retrying"));
        assert!(h.provisioner.unassign_count() >= ALERT_AFTER_FAILED_REVOKES as usize);
        assert_eq!(h.workflow.get(&id).await.unwrap().state, JitState::Granted);

        let outcome = runner.await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::RevokeFailed {
                reason: RevocationReason::HoldElapsed,
                ..
            }
        ));
        assert!(started.elapsed() <= 120 * MINUTE + Duration::from_secs(1));
        assert!(h.provisioner.unassign_count() > 10);

        assert_eq!(h.alerter.count(), 2);
        let last = h.alerter.alerts.lock().unwrap()[1].clone();
        assert!(last.summary.contains("escalated"));

        let req = h.workflow.get(&id).await.unwrap();
        assert_eq!(req.state, JitState::Granted);
        assert!(req.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_holds_for_remaining_time() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let req = granted_earlier(chrono::Duration::minutes(10));
        let id = req.request_id;
        h.store.insert(req.clone()).await.unwrap();
        h.provisioner.assignments.lock().unwrap().insert((req.requester.clone(), PS.to_string()));
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let outcome = h.workflow.resume(id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::HoldElapsed
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= 9 * MINUTE && elapsed <= 10 * MINUTE);
        assert_eq!(h.provisioner.assign_count(), 0);
        assert!(!h.provisioner.assigned(&req));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_expiry_revokes_at_once() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let req = granted_earlier(chrono::Duration::minutes(-45));
        h.store.insert(req.clone()).await.unwrap();
        let (_tx, rx) = oneshot::channel();

        let started = Instant::now();
        let outcome = h.workflow.resume(req.request_id, rx).await;

        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::HoldElapsed
            }
        );
        assert!(started.elapsed() < MINUTE);
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_unconfirmed_grant_revokes() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let mut req = JitAccessRequest::new("u-alice", PS, "why");
        req.state = JitState::ManagerApproved;
        req.grant_attempted = true;
        h.store.insert(req.clone()).await.unwrap();
        let (_tx, rx) = oneshot::channel();

        let outcome = h.workflow.resume(req.request_id, rx).await;
        assert_eq!(
            outcome,
            RunOutcome::Revoked {
                reason: RevocationReason::GrantFailed
            }
        );
        assert_eq!(h.provisioner.unassign_count(), 1);
    }

    #[tokio::test]
    async fn test_grant_attempt_is_saved_before_provisioning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jit.json");
        let provisioner = FakeProvisioner {
            fail_assign: true,
            ..Default::default()
        };
        let h = harness_with_store(JitStore::open(&path).await.unwrap(), provisioner, JitPolicy::default());
        let id = approved(&h).await;
        assert!(h.workflow.grant(&id).await.is_err());

        let reopened = JitStore::open(&path).await.unwrap();
        let saved = reopened.get(&id).await.unwrap();
        assert_eq!(saved.state, JitState::ManagerApproved);
        assert_eq!(saved.approved_by.as_deref(), Some("u-manager"));
        assert!(saved.grant_attempted);
        assert!(saved.last_error.is_some());
        assert_eq!(reopened.pending_revokes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_is_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jit.json");
        let h = harness_with_store(
            JitStore::open(&path).await.unwrap(),
            FakeProvisioner::default(),
            JitPolicy::default(),
        );
        let id = approved(&h).await;
        h.workflow.grant(&id).await.unwrap();
        assert_eq!(JitStore::open(&path).await.unwrap().pending_revokes().await.len(), 1);

        h.workflow.revoke(&id, RevocationReason::Manual).await.unwrap();
        let reopened = JitStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(&id).await.unwrap().state, JitState::Revoked);
        assert!(reopened.pending_revokes().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_unapproved_request_aborts() {
        let h = harness(FakeProvisioner::default(), JitPolicy::default());
        let req = h.workflow.submit("u-alice", PS, "why").await.unwrap();
        let (_tx, rx) = oneshot::channel();

        let outcome = h.workflow.run(req.request_id, rx).await;
        assert!(matches!(outcome, RunOutcome::Aborted { .. }));
        assert_eq!(h.provisioner.unassign_count(), 0);
    }
}
