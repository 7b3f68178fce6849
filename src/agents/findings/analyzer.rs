//! Access Analyzer finding lookup

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_accessanalyzer::Client;
use tracing::{debug, info};

use super::types::{Finding, ResourceType};

/// Resolves `(analyzer ARN, finding id)` to the full finding
#[async_trait]
pub trait FindingSource: Send + Sync {
    /// `Ok(None)` when the finding does not exist
    async fn get_finding(&self, analyzer_arn: &str, finding_id: &str) -> Result<Option<Finding>>;
}

const S3_WRITE_ACTIONS: &[&str] = &[
    "s3:PutObject",
    "s3:PutObjectAcl",
    "s3:DeleteObject",
    "s3:*",
];

/// Derive the issue code the classifier keys on.
///
/// The analyzer reports exposure as `isPublic` plus the granted actions; the
/// issue code is computed from those.
pub fn derive_issue_code(resource_type: &ResourceType, is_public: bool, actions: &[String]) -> String {
    if !is_public {
        return String::new();
    }

    let code = match resource_type {
        ResourceType::S3Bucket => {
            if actions.iter().any(|a| S3_WRITE_ACTIONS.contains(&a.as_str())) {
                "S3_BUCKET_PUBLIC_WRITE_ACCESS"
            } else {
                "S3_BUCKET_PUBLIC_READ_ACCESS"
            }
        }
        ResourceType::IamRole => "IAM_ROLE_ALLOWS_PUBLIC_ASSUMPTION",
        _ => "IAM_POLICY_ALLOWS_PUBLIC_ACCESS",
    };
    code.to_string()
}

/// IAM Access Analyzer backed lookup
pub struct AccessAnalyzerSource {
    client: Client,
}

impl AccessAnalyzerSource {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl FindingSource for AccessAnalyzerSource {
    async fn get_finding(&self, analyzer_arn: &str, finding_id: &str) -> Result<Option<Finding>> {
        debug!(analyzer = %analyzer_arn, finding = %finding_id, "Fetching finding");

        let output = match self
            .client
            .get_finding()
            .analyzer_arn(analyzer_arn)
            .id(finding_id)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|se| se.is_resource_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    info!(finding = %finding_id, "Finding not found");
                    return Ok(None);
                }
                return Err(anyhow!("Access Analyzer GetFinding failed: {}", e));
            }
        };

        let Some(raw) = output.finding() else {
            return Ok(None);
        };

        let resource_type = ResourceType::from(raw.resource_type().as_str());
        let issue_code =
            derive_issue_code(&resource_type, raw.is_public().unwrap_or(false), raw.action());

        Ok(Some(Finding {
            id: raw.id().to_string(),
            analyzer_arn: Some(analyzer_arn.to_string()),
            resource_type,
            resource: raw.resource().map(|r| r.to_string()),
            status: raw.status().as_str().to_string(),
            issue_code,
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_finding_has_no_issue_code() {
        assert_eq!(derive_issue_code(&ResourceType::S3Bucket, false, &[]), "");
    }

    #[test]
    fn test_public_bucket_read_vs_write() {
        let read = vec!["s3:GetObject".to_string()];
        let write = vec!["s3:GetObject".to_string(), "s3:PutObject".to_string()];

        assert_eq!(
            derive_issue_code(&ResourceType::S3Bucket, true, &read),
            "S3_BUCKET_PUBLIC_READ_ACCESS"
        );
        assert_eq!(
            derive_issue_code(&ResourceType::S3Bucket, true, &write),
            "S3_BUCKET_PUBLIC_WRITE_ACCESS"
        );
    }

    #[test]
    fn test_public_role_and_other() {
        assert_eq!(
            derive_issue_code(&ResourceType::IamRole, true, &[]),
            "IAM_ROLE_ALLOWS_PUBLIC_ASSUMPTION"
        );
        assert_eq!(
            derive_issue_code(&ResourceType::KmsKey, true, &[]),
            "IAM_POLICY_ALLOWS_PUBLIC_ACCESS"
        );
    }
}
