//! Supervised JIT executions
//!
//! One tokio task per approved request, each with a cancel handle. A cancel
//! or manual revoke on a running request is delivered to that task so the
//! revoke happens on the workflow's own path, exactly once.
//!
//! On startup `resume` re-arms every request an earlier process left
//! granted. On shutdown every running execution is told to revoke and is
//! waited for.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::types::{
    JitAccessRequest, JitError, JitState, RevocationReason, RevokeResult, RunOutcome,
};
use super::workflow::JitWorkflow;

/// How long finished requests and outcomes are kept by default
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

struct RunningWorkflow {
    requester: String,
    permission_set: String,
    cancel: Option<oneshot::Sender<RevocationReason>>,
    handle: Option<JoinHandle<()>>,
}

struct FinishedRun {
    outcome: RunOutcome,
    finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Execution {
    Fresh,
    Resumed,
}

/// What a stop request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The running execution was told to revoke
    Signalled,
    /// No execution was running; revoke was applied directly
    Revoked(RevokeResult),
}

pub struct JitSupervisor {
    workflow: Arc<JitWorkflow>,
    running: Arc<Mutex<HashMap<Uuid, RunningWorkflow>>>,
    outcomes: Arc<RwLock<HashMap<Uuid, FinishedRun>>>,
    retention: Duration,
}

impl JitSupervisor {
    pub fn new(workflow: Arc<JitWorkflow>) -> Self {
        Self {
            workflow,
            running: Arc::new(Mutex::new(HashMap::new())),
            outcomes: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_RETENTION,
        }
    }

    /// How long revoked requests and their outcomes are kept
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn workflow(&self) -> &Arc<JitWorkflow> {
        &self.workflow
    }

    /// Spawn the grant/hold/revoke execution for an approved request.
    /// Starting a request that is already running is a no-op. A request
    /// whose (requester, permission set) is held by another request is
    /// refused, since revoking one would remove the other's access.
    pub async fn start(&self, request_id: Uuid) -> Result<(), JitError> {
        let request = self.workflow.get(&request_id).await?;
        if request.state != JitState::ManagerApproved {
            return Err(JitError::InvalidTransition {
                request_id,
                from: request.state,
                action: "start",
            });
        }

        let mut running = self.running.lock().await;
        if running.contains_key(&request_id) {
            return Ok(());
        }

        let overlapping = running.iter().find(|(_, r)| {
            r.requester == request.requester && r.permission_set == request.target_permission_set
        });
        let holder = match overlapping {
            Some((id, _)) => Some(*id),
            None => self.workflow.assignment_holder(&request).await,
        };
        if let Some(holder) = holder {
            return Err(JitError::Conflict(format!(
                "request {} already holds {} for {}",
                holder, request.target_permission_set, request.requester
            )));
        }

        self.spawn(&mut running, &request, Execution::Fresh);
        Ok(())
    }

    /// Re-arm every request left granted (or possibly granted) by an
    /// earlier process. Returns how many executions were started.
    pub async fn resume(&self) -> usize {
        let pending = self.workflow.pending_revokes().await;
        let mut running = self.running.lock().await;
        let mut resumed = 0;
        for request in &pending {
            if running.contains_key(&request.request_id) {
                continue;
            }
            self.spawn(&mut running, request, Execution::Resumed);
            resumed += 1;
        }
        if resumed > 0 {
            warn!(count = %resumed, "Resumed JIT requests left granted by an earlier run");
        }
        resumed
    }

    fn spawn(
        &self,
        running: &mut HashMap<Uuid, RunningWorkflow>,
        request: &JitAccessRequest,
        execution: Execution,
    ) {
        let request_id = request.request_id;
        let (tx, rx) = oneshot::channel();
        let workflow = self.workflow.clone();
        let running_map = self.running.clone();
        let outcomes = self.outcomes.clone();

        let handle = tokio::spawn(async move {
            let outcome = match execution {
                Execution::Fresh => workflow.run(request_id, rx).await,
                Execution::Resumed => workflow.resume(request_id, rx).await,
            };
            match &outcome {
                RunOutcome::RevokeFailed { error, .. } => {
                    error!(request = %request_id, error = %error, "JIT execution ended without revoke")
                }
                other => info!(request = %request_id, outcome = ?other, "JIT execution finished"),
            }
            outcomes.write().await.insert(
                request_id,
                FinishedRun {
                    outcome,
                    finished_at: Utc::now(),
                },
            );
            running_map.lock().await.remove(&request_id);
        });

        running.insert(
            request_id,
            RunningWorkflow {
                requester: request.requester.clone(),
                permission_set: request.target_permission_set.clone(),
                cancel: Some(tx),
                handle: Some(handle),
            },
        );
        info!(request = %request_id, execution = ?execution, "JIT execution started");
    }

    /// Stop a request early. Running executions revoke on their own path;
    /// otherwise the revoke is applied directly.
    pub async fn stop(
        &self,
        request_id: Uuid,
        reason: RevocationReason,
    ) -> Result<StopOutcome, JitError> {
        {
            let mut running = self.running.lock().await;
            if let Some(sender) = running
                .get_mut(&request_id)
                .and_then(|r| r.cancel.take())
            {
                if sender.send(reason).is_ok() {
                    info!(request = %request_id, reason = ?reason, "Stop signalled to running execution");
                    return Ok(StopOutcome::Signalled);
                }
            }
        }

        let result = self.workflow.revoke(&request_id, reason).await?;
        Ok(StopOutcome::Revoked(result))
    }

    /// Tell every running execution to revoke and wait for all of them.
    /// Returns how many were waited for.
    pub async fn shutdown(&self) -> usize {
        let executions: Vec<(Uuid, Option<oneshot::Sender<RevocationReason>>, Option<JoinHandle<()>>)> = {
            let mut running = self.running.lock().await;
            running
                .iter_mut()
                .map(|(id, r)| (*id, r.cancel.take(), r.handle.take()))
                .collect()
        };

        info!(count = %executions.len(), "Stopping JIT executions");
        let mut joined = 0;
        for (request_id, cancel, handle) in executions {
            if let Some(cancel) = cancel {
                let _ = cancel.send(RevocationReason::Shutdown);
            }
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    error!(request = %request_id, error = %e, "JIT execution task failed");
                }
                joined += 1;
            }
        }
        joined
    }

    pub async fn is_running(&self, request_id: &Uuid) -> bool {
        self.running.lock().await.contains_key(request_id)
    }

    pub async fn outcome(&self, request_id: &Uuid) -> Option<RunOutcome> {
        self.outcomes
            .read()
            .await
            .get(request_id)
            .map(|f| f.outcome.clone())
    }

    /// Wait for a running execution to finish
    pub async fn join(&self, request_id: &Uuid) -> Option<RunOutcome> {
        let handle = self
            .running
            .lock()
            .await
            .get_mut(request_id)
            .and_then(|r| r.handle.take());

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(request = %request_id, error = %e, "JIT execution task failed");
            }
        }
        self.outcome(request_id).await
    }

    /// Forget revoked requests and finished outcomes older than the
    /// retention window. Failed revokes keep their outcome, their request
    /// is still granted.
    pub async fn prune(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let outcomes_removed = {
            let mut outcomes = self.outcomes.write().await;
            let before = outcomes.len();
            outcomes.retain(|_, f| {
                f.finished_at > cutoff || matches!(f.outcome, RunOutcome::RevokeFailed { .. })
            });
            before - outcomes.len()
        };

        let keep: HashSet<Uuid> = self.running.lock().await.keys().copied().collect();
        let requests_removed = self.workflow.prune(cutoff, &keep).await;

        if outcomes_removed > 0 || requests_removed > 0 {
            info!(
                outcomes = %outcomes_removed,
                requests = %requests_removed,
                "Pruned finished JIT requests"
            );
        }
        requests_removed
    }

    /// Prune on a fixed interval until the task is aborted
    pub fn spawn_pruner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                supervisor.prune().await;
            }
        })
    }
}
