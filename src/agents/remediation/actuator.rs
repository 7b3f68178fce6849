//! Remediation Actuator
//!
//! The only component allowed to mutate live resources in response to a
//! finding. Current policy: public S3 exposure.
//!
//! Every step is idempotent so redelivered events converge on the same
//! bucket state:
//! 1. Public access block with all four flags set
//! 2. Bucket policy with every `Allow` + `Principal: "*"` statement removed
//!
//! A failed step is recorded and the other step still runs.

use std::sync::Arc;
use tracing::{info, warn};

use super::policy::strip_public_allow;
use super::s3::BucketPolicyApi;
use super::types::{ActuationReport, BlockOutcome, PolicyOutcome, StepFailure};
use crate::agents::findings::{Finding, ResourceType, RiskLevel};
use crate::error::GuardError;

/// Issue codes that mean the bucket is publicly exposed
pub const PUBLIC_EXPOSURE_CODES: &[&str] = &[
    "S3_BUCKET_PUBLIC_READ_ACCESS",
    "S3_BUCKET_PUBLIC_WRITE_ACCESS",
];

/// Only findings in this state are acted on; archived ones were accepted
pub const ACTIVE_STATUS: &str = "ACTIVE";

/// Bucket name from an S3 ARN (`arn:aws:s3:::bucket` or `arn:aws:s3:::bucket/key`).
/// Bucket ARNs carry no region or account; access points and object
/// lambda ARNs do and are rejected.
pub fn bucket_from_arn(arn: &str) -> Result<String, GuardError> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "s3" {
        return Err(GuardError::validation(format!("not an S3 ARN: {}", arn)));
    }
    if !parts[3].is_empty() || !parts[4].is_empty() {
        return Err(GuardError::validation(format!(
            "not an S3 bucket ARN: {}",
            arn
        )));
    }

    let bucket = parts[5].split('/').next().unwrap_or("");
    if bucket.is_empty() {
        return Err(GuardError::validation(format!(
            "S3 ARN has no bucket name: {}",
            arn
        )));
    }

    Ok(bucket.to_string())
}

pub struct RemediationActuator {
    s3: Arc<dyn BucketPolicyApi>,
    min_risk: RiskLevel,
}

impl RemediationActuator {
    pub fn new(s3: Arc<dyn BucketPolicyApi>) -> Self {
        Self {
            s3,
            min_risk: RiskLevel::High,
        }
    }

    /// Lowest risk level that is acted on (default HIGH)
    pub fn with_min_risk(mut self, min_risk: RiskLevel) -> Self {
        self.min_risk = min_risk;
        self
    }

    /// Whether a classified finding falls under the live-remediation policy
    pub fn qualifies(&self, finding: &Finding, risk: RiskLevel) -> bool {
        finding.status == ACTIVE_STATUS
            && finding.resource_type == ResourceType::S3Bucket
            && PUBLIC_EXPOSURE_CODES.contains(&finding.issue_code.as_str())
            && risk >= self.min_risk
    }

    /// Remediate the bucket a finding points at
    pub async fn remediate(&self, finding: &Finding) -> Result<ActuationReport, GuardError> {
        if finding.resource_type != ResourceType::S3Bucket {
            return Err(GuardError::validation(format!(
                "actuator only handles S3 buckets, got {}",
                finding.resource_type
            )));
        }

        let resource = finding
            .resource
            .as_deref()
            .ok_or_else(|| GuardError::validation("finding has no resource ARN"))?;
        let bucket = bucket_from_arn(resource)?;

        info!(finding = %finding.id, bucket = %bucket, "Remediating public bucket");
        Ok(self.remediate_bucket(&bucket).await)
    }

    /// Apply both remediation steps; never fails as a whole
    pub async fn remediate_bucket(&self, bucket: &str) -> ActuationReport {
        let mut failures = Vec::new();

        let public_access_block = match self.s3.put_public_access_block(bucket).await {
            Ok(()) => BlockOutcome::Applied,
            Err(e) => {
                record(&mut failures, bucket, "put_public_access_block", e);
                BlockOutcome::Failed
            }
        };

        let policy = self.strip_public_statements(bucket, &mut failures).await;

        info!(
            bucket = %bucket,
            block = ?public_access_block,
            policy = ?policy,
            failures = %failures.len(),
            "Bucket remediation finished"
        );

        ActuationReport {
            bucket: bucket.to_string(),
            public_access_block,
            policy,
            failures,
        }
    }

    async fn strip_public_statements(
        &self,
        bucket: &str,
        failures: &mut Vec<StepFailure>,
    ) -> PolicyOutcome {
        let raw = match self.s3.get_bucket_policy(bucket).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return PolicyOutcome::NoPolicy,
            Err(e) => {
                record(failures, bucket, "get_bucket_policy", e);
                return PolicyOutcome::Failed;
            }
        };

        let filtered = match strip_public_allow(&raw) {
            Ok(f) => f,
            Err(e) => {
                record(failures, bucket, "parse_bucket_policy", e);
                return PolicyOutcome::Failed;
            }
        };

        if !filtered.changed() {
            return PolicyOutcome::Unchanged;
        }

        // S3 rejects a policy with an empty statement list
        if filtered.remaining == 0 {
            return match self.s3.delete_bucket_policy(bucket).await {
                Ok(()) => PolicyOutcome::Deleted {
                    removed: filtered.removed,
                },
                Err(e) => {
                    record(failures, bucket, "delete_bucket_policy", e);
                    PolicyOutcome::Failed
                }
            };
        }

        match self
            .s3
            .put_bucket_policy(bucket, &filtered.document.to_string())
            .await
        {
            Ok(()) => PolicyOutcome::Rewritten {
                removed: filtered.removed,
            },
            Err(e) => {
                record(failures, bucket, "put_bucket_policy", e);
                PolicyOutcome::Failed
            }
        }
    }
}

fn record(failures: &mut Vec<StepFailure>, bucket: &str, step: &str, err: anyhow::Error) {
    let failure = GuardError::step(step, format!("{:#}", err));
    warn!(bucket = %bucket, error = %failure, "Remediation step failed, continuing");
    failures.push(StepFailure {
        step: step.to_string(),
        message: format!("{:#}", err),
    });
}
