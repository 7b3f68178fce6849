//! Entry points
//!
//! Every entry point answers with a [`HandlerResponse`]: errors and panics
//! are converted, never propagated to the dispatcher.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agents::credential_hygiene::{CredentialScanner, IamAccessKeyClient};
use crate::agents::findings::{AccessAnalyzerSource, FindingProcessor, RuleTable};
use crate::agents::jit_access::{
    JitError, JitStore, JitSupervisor, JitWorkflow, RevocationReason, SsoAssignmentProvisioner,
    StopOutcome,
};
use crate::agents::remediation::{RemediationActuator, S3BucketPolicyClient};
use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::tools::{load_sdk_config, Alerter, LogAlerter, WebhookAlerter};

/// Result handed back to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerResponse {
    pub status_code: u16,
    pub body: Value,
}

impl HandlerResponse {
    pub fn ok(body: impl Serialize) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status_code: u16, body: impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status_code, body },
            Err(e) => Self::error(500, "unexpected_failure", format!("Failed to encode body: {}", e)),
        }
    }

    pub fn error(status_code: u16, kind: &str, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: json!({ "error": kind, "message": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

impl From<GuardError> for HandlerResponse {
    fn from(err: GuardError) -> Self {
        HandlerResponse::error(err.status_code(), err.kind(), err.to_string())
    }
}

impl From<JitError> for HandlerResponse {
    fn from(err: JitError) -> Self {
        HandlerResponse::error(err.status_code(), err.kind(), err.to_string())
    }
}

/// Per-invocation metadata used for log correlation
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
}

impl InvocationContext {
    pub fn new() -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_id(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
        }
    }
}

impl Default for InvocationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JitSubmitRequest {
    pub requester: String,
    pub target_permission_set: String,
    pub justification: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JitApproveRequest {
    pub approver: String,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run an entry point, turning a panic into a 500 response
async fn guarded<F>(operation: &str, ctx: &InvocationContext, work: F) -> HandlerResponse
where
    F: Future<Output = HandlerResponse>,
{
    let response = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let message = panic_message(&*panic);
            error!(
                operation = %operation,
                invocation = %ctx.invocation_id,
                panic = %message,
                "Handler panicked"
            );
            HandlerResponse::error(500, "unexpected_failure", message)
        }
    };

    if response.is_success() {
        info!(operation = %operation, invocation = %ctx.invocation_id, status = %response.status_code, "Handled");
    } else {
        warn!(operation = %operation, invocation = %ctx.invocation_id, status = %response.status_code, body = %response.body, "Handled with error");
    }
    response
}

fn parse_request_id(raw: &str) -> Result<Uuid, JitError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| JitError::Validation(format!("invalid request id: {}", raw)))
}

fn jit_disabled() -> HandlerResponse {
    HandlerResponse::error(
        503,
        "jit_disabled",
        "JIT access requires IAM_GUARD_SSO_INSTANCE_ARN and IAM_GUARD_ACCOUNT_ID",
    )
}

/// The set of entry points, with their injected collaborators
#[derive(Clone)]
pub struct Handlers {
    findings: Arc<FindingProcessor>,
    scanner: Arc<CredentialScanner>,
    jit: Option<Arc<JitSupervisor>>,
}

impl Handlers {
    pub fn new(findings: Arc<FindingProcessor>, scanner: Arc<CredentialScanner>) -> Self {
        Self {
            findings,
            scanner,
            jit: None,
        }
    }

    pub fn with_jit(mut self, jit: Arc<JitSupervisor>) -> Self {
        self.jit = Some(jit);
        self
    }

    pub fn jit(&self) -> Option<&Arc<JitSupervisor>> {
        self.jit.as_ref()
    }

    /// Wire every entry point to the AWS-backed implementations
    pub async fn from_config(config: &GuardConfig) -> anyhow::Result<Self> {
        let sdk = load_sdk_config(config.region.as_deref()).await;

        let rules = RuleTable::load(config.remediation_rules.as_deref())?;
        let actuator = RemediationActuator::new(Arc::new(S3BucketPolicyClient::new(&sdk)))
            .with_min_risk(config.min_actuation_risk);
        let findings = FindingProcessor::new(Arc::new(rules), Arc::new(AccessAnalyzerSource::new(&sdk)))
            .with_actuator(Arc::new(actuator));

        let scanner = CredentialScanner::new(Arc::new(IamAccessKeyClient::new(&sdk)))
            .with_max_age_days(config.key_max_age_days)
            .with_concurrency(config.scan_concurrency);

        let mut handlers = Handlers::new(Arc::new(findings), Arc::new(scanner));

        match (&config.sso_instance_arn, &config.account_id) {
            (Some(instance_arn), Some(account_id)) => {
                let alerter: Arc<dyn Alerter> = match &config.alert_webhook_url {
                    Some(url) => Arc::new(WebhookAlerter::new(url)?),
                    None => Arc::new(LogAlerter),
                };
                let store = match &config.jit_state_path {
                    Some(path) => JitStore::open(path).await?,
                    None => {
                        warn!("IAM_GUARD_JIT_STATE_PATH not set; JIT requests are not kept across restarts");
                        JitStore::new()
                    }
                };
                let workflow = JitWorkflow::new(
                    Arc::new(store),
                    Arc::new(SsoAssignmentProvisioner::new(&sdk, instance_arn, account_id)),
                    alerter,
                    config.jit_policy(),
                )?;
                info!(account = %account_id, "JIT access enabled");
                let supervisor =
                    JitSupervisor::new(Arc::new(workflow)).with_retention(config.jit_retention);
                handlers = handlers.with_jit(Arc::new(supervisor));
            }
            _ => warn!("JIT access disabled (set IAM_GUARD_SSO_INSTANCE_ARN and IAM_GUARD_ACCOUNT_ID to enable)"),
        }

        Ok(handlers)
    }

    /// Access Analyzer finding event
    pub async fn finding_event(&self, event: &Value, ctx: &InvocationContext) -> HandlerResponse {
        guarded("finding_event", ctx, async {
            match self.findings.process_event(event).await {
                Ok(report) => HandlerResponse::ok(report),
                Err(e) => e.into(),
            }
        })
        .await
    }

    /// Scheduled access-key sweep; no payload
    pub async fn credential_scan(&self, ctx: &InvocationContext) -> HandlerResponse {
        guarded("credential_scan", ctx, async {
            match self.scanner.run().await {
                Ok(report) => HandlerResponse::ok(report),
                Err(e) => e.into(),
            }
        })
        .await
    }

    pub async fn jit_submit(&self, body: &Value, ctx: &InvocationContext) -> HandlerResponse {
        guarded("jit_submit", ctx, async {
            let Some(jit) = &self.jit else {
                return jit_disabled();
            };
            let input: JitSubmitRequest = match serde_json::from_value(body.clone()) {
                Ok(input) => input,
                Err(e) => return JitError::Validation(format!("invalid request body: {}", e)).into(),
            };

            match jit
                .workflow()
                .submit(&input.requester, &input.target_permission_set, &input.justification)
                .await
            {
                Ok(request) => HandlerResponse::with_status(201, request),
                Err(e) => e.into(),
            }
        })
        .await
    }

    /// Approve and start the supervised grant/hold/revoke execution
    pub async fn jit_approve(
        &self,
        request_id: &str,
        body: &Value,
        ctx: &InvocationContext,
    ) -> HandlerResponse {
        guarded("jit_approve", ctx, async {
            let Some(jit) = &self.jit else {
                return jit_disabled();
            };
            let result = async {
                let id = parse_request_id(request_id)?;
                let input: JitApproveRequest = serde_json::from_value(body.clone())
                    .map_err(|e| JitError::Validation(format!("invalid request body: {}", e)))?;
                let request = jit.workflow().approve(&id, &input.approver).await?;
                jit.start(id).await?;
                Ok::<_, JitError>(request)
            }
            .await;

            match result {
                Ok(request) => HandlerResponse::ok(request),
                Err(e) => e.into(),
            }
        })
        .await
    }

    pub async fn jit_get(&self, request_id: &str, ctx: &InvocationContext) -> HandlerResponse {
        guarded("jit_get", ctx, async {
            let Some(jit) = &self.jit else {
                return jit_disabled();
            };
            let result = async {
                let id = parse_request_id(request_id)?;
                let request = jit.workflow().get(&id).await?;
                Ok::<_, JitError>(json!({
                    "request": request,
                    "running": jit.is_running(&id).await,
                    "outcome": jit.outcome(&id).await,
                }))
            }
            .await;

            match result {
                Ok(body) => HandlerResponse::ok(body),
                Err(e) => e.into(),
            }
        })
        .await
    }

    /// Requester or approver withdraws the access early
    pub async fn jit_cancel(&self, request_id: &str, ctx: &InvocationContext) -> HandlerResponse {
        self.jit_stop("jit_cancel", request_id, RevocationReason::Cancelled, ctx)
            .await
    }

    /// Operator-initiated revoke
    pub async fn jit_revoke(&self, request_id: &str, ctx: &InvocationContext) -> HandlerResponse {
        self.jit_stop("jit_revoke", request_id, RevocationReason::Manual, ctx)
            .await
    }

    async fn jit_stop(
        &self,
        operation: &str,
        request_id: &str,
        reason: RevocationReason,
        ctx: &InvocationContext,
    ) -> HandlerResponse {
        guarded(operation, ctx, async {
            let Some(jit) = &self.jit else {
                return jit_disabled();
            };
            let result = async {
                let id = parse_request_id(request_id)?;
                jit.stop(id, reason).await
            }
            .await;

            match result {
                Ok(StopOutcome::Signalled) => {
                    HandlerResponse::with_status(202, json!({ "signalled": true }))
                }
                Ok(StopOutcome::Revoked(result)) => HandlerResponse::ok(result),
                Err(e) => e.into(),
            }
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::agents::credential_hygiene::iam::testing::FakeIam;
    use crate::agents::findings::analyzer::testing::StaticFindingSource;
    use crate::agents::findings::RuleTable;
    use crate::agents::jit_access::provisioner::testing::FakeProvisioner;
    use crate::agents::jit_access::{JitPolicy, JitStore, JitWorkflow};
    use crate::tools::alert::testing::RecordingAlerter;

    /// Handlers wired to in-memory fakes
    pub fn fake_handlers(source: StaticFindingSource, iam: Arc<FakeIam>) -> Handlers {
        fake_handlers_with(source, iam, Arc::new(FakeProvisioner::default()))
    }

    pub fn fake_handlers_with(
        source: StaticFindingSource,
        iam: Arc<FakeIam>,
        provisioner: Arc<FakeProvisioner>,
    ) -> Handlers {
        let findings = FindingProcessor::new(Arc::new(RuleTable::builtin().clone()), Arc::new(source));
        let scanner = CredentialScanner::new(iam);
        let workflow = JitWorkflow::new(
            Arc::new(JitStore::new()),
            provisioner,
            Arc::new(RecordingAlerter::default()),
            JitPolicy::default(),
        )
        .unwrap();

        Handlers::new(Arc::new(findings), Arc::new(scanner))
            .with_jit(Arc::new(JitSupervisor::new(Arc::new(workflow))))
    }
}
