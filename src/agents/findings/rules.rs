//! Finding classification and remediation advice
//!
//! Both are table lookups keyed by `(resource type, issue code)`. The
//! built-in table is assembled once; deployments may extend it with a JSON
//! rule file without touching control flow.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::info;

use super::types::{Finding, RemediationPlan, ResourceType, RiskAssessment, RiskLevel};

const HIGH_RISK_ISSUES: &[&str] = &[
    "S3_BUCKET_PUBLIC_READ_ACCESS",
    "S3_BUCKET_PUBLIC_WRITE_ACCESS",
    "IAM_ROLE_ALLOWS_PUBLIC_ASSUMPTION",
    "KMS_KEY_WITH_SYMMETRIC_ENCRYPTION",
    "IAM_POLICY_ALLOWS_PUBLIC_ACCESS",
];

const MEDIUM_RISK_ISSUES: &[&str] = &[
    "S3_BUCKET_LOGGING_DISABLED",
    "IAM_ROLE_OVERLY_PERMISSIVE",
    "KMS_KEY_ROTATION_DISABLED",
];

/// (resource type, issue code, steps)
const ADVICE: &[(&str, &str, &[&str])] = &[
    (
        "AWS::IAM::Role",
        "IAM_ROLE_ALLOWS_PUBLIC_ASSUMPTION",
        &[
            "Remove the public trust policy from the role",
            "Add conditions to restrict who can assume the role",
            "Consider using AWS Organizations SCPs to prevent public role assumption",
        ],
    ),
    (
        "AWS::IAM::Role",
        "IAM_ROLE_OVERLY_PERMISSIVE",
        &[
            "Review and reduce the permissions attached to the role",
            "Apply the principle of least privilege",
            "Use specific resource ARNs instead of wildcards where possible",
            "Consider using AWS managed policies instead of custom policies",
        ],
    ),
    (
        "AWS::IAM::User",
        "IAM_USER_UNUSED_ACCESS_KEY",
        &[
            "Delete unused access keys",
            "Implement access key rotation policies",
            "Consider using IAM roles instead of access keys",
        ],
    ),
    (
        "AWS::IAM::User",
        "IAM_USER_UNUSED_CREDENTIALS",
        &[
            "Remove unused credentials",
            "Implement credential lifecycle management",
            "Consider using AWS SSO for user access",
        ],
    ),
    (
        "AWS::S3::Bucket",
        "S3_BUCKET_PUBLIC_READ_ACCESS",
        &[
            "Remove public read access from the bucket policy",
            "Enable S3 Block Public Access settings",
            "Review and update bucket ACLs",
        ],
    ),
    (
        "AWS::S3::Bucket",
        "S3_BUCKET_PUBLIC_WRITE_ACCESS",
        &[
            "Remove public write access from the bucket policy",
            "Enable S3 Block Public Access settings",
            "Implement proper access controls",
        ],
    ),
    (
        "AWS::S3::Bucket",
        "S3_BUCKET_LOGGING_DISABLED",
        &[
            "Enable S3 server access logging",
            "Configure CloudTrail for S3 API calls",
            "Set up monitoring and alerting",
        ],
    ),
    (
        "AWS::KMS::Key",
        "KMS_KEY_WITH_SYMMETRIC_ENCRYPTION",
        &[
            "Consider using asymmetric encryption for better security",
            "Review key usage patterns",
            "Implement proper key rotation",
        ],
    ),
    (
        "AWS::KMS::Key",
        "KMS_KEY_ROTATION_DISABLED",
        &[
            "Enable automatic key rotation",
            "Implement manual key rotation procedures",
            "Review key lifecycle management",
        ],
    ),
];

/// Single-step advice for a known type with an unmatched issue code
const TYPE_FALLBACK: &[(&str, &str)] = &[
    ("AWS::IAM::Role", "Review the role's trust policy and attached permissions"),
    ("AWS::IAM::User", "Review user permissions and remove unnecessary access"),
    ("AWS::S3::Bucket", "Review bucket policies and access controls"),
    ("AWS::KMS::Key", "Review KMS key policies and usage"),
];

const GENERIC_ADVICE: &[&str] = &[
    "Review the resource's access policies",
    "Apply the principle of least privilege",
    "Consider using AWS Organizations SCPs for additional controls",
    "Implement monitoring and alerting for this resource type",
];

/// Serializable rule set, the format of the optional override file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub advice: Vec<AdviceRule>,
    pub type_fallback: Vec<TypeFallbackRule>,
    /// Replaces the generic four-step list when non-empty
    pub generic: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceRule {
    pub resource_type: String,
    pub issue_code: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeFallbackRule {
    pub resource_type: String,
    pub step: String,
}

/// Lookup table for classification and advice
#[derive(Debug, Clone)]
pub struct RuleTable {
    risk: HashMap<String, RiskLevel>,
    advice: HashMap<(ResourceType, String), Vec<String>>,
    type_fallback: HashMap<ResourceType, String>,
    generic: Vec<String>,
}

fn owned(steps: &[&str]) -> Vec<String> {
    steps.iter().map(|s| s.to_string()).collect()
}

impl RuleTable {
    /// The built-in table, assembled on first use
    pub fn builtin() -> &'static RuleTable {
        static TABLE: OnceLock<RuleTable> = OnceLock::new();
        TABLE.get_or_init(|| {
            let mut table = RuleTable {
                risk: HashMap::new(),
                advice: HashMap::new(),
                type_fallback: HashMap::new(),
                generic: owned(GENERIC_ADVICE),
            };
            table.extend(RuleSet {
                high: owned(HIGH_RISK_ISSUES),
                medium: owned(MEDIUM_RISK_ISSUES),
                advice: ADVICE
                    .iter()
                    .map(|(rt, code, steps)| AdviceRule {
                        resource_type: rt.to_string(),
                        issue_code: code.to_string(),
                        steps: owned(steps),
                    })
                    .collect(),
                type_fallback: TYPE_FALLBACK
                    .iter()
                    .map(|(rt, step)| TypeFallbackRule {
                        resource_type: rt.to_string(),
                        step: step.to_string(),
                    })
                    .collect(),
                generic: Vec::new(),
            });
            table
        })
    }

    /// Built-in table, extended by the rule file at `path` when given
    pub fn load(path: Option<&Path>) -> Result<RuleTable> {
        let mut table = RuleTable::builtin().clone();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read rule file: {:?}", path))?;
            let set: RuleSet = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse rule file: {:?}", path))?;

            info!(
                path = ?path,
                high = %set.high.len(),
                medium = %set.medium.len(),
                advice = %set.advice.len(),
                "Loaded remediation rule overrides"
            );
            table.extend(set);
        }

        Ok(table)
    }

    /// Merge a rule set; later entries override earlier ones
    pub fn extend(&mut self, set: RuleSet) {
        for code in set.medium {
            self.risk.insert(code, RiskLevel::Medium);
        }
        for code in set.high {
            self.risk.insert(code, RiskLevel::High);
        }
        for rule in set.advice {
            self.advice.insert(
                (ResourceType::from(rule.resource_type), rule.issue_code),
                rule.steps,
            );
        }
        for rule in set.type_fallback {
            self.type_fallback
                .insert(ResourceType::from(rule.resource_type), rule.step);
        }
        if !set.generic.is_empty() {
            self.generic = set.generic;
        }
    }

    /// Risk level for an issue code. Unknown codes are LOW, never an error.
    pub fn risk_level(&self, _resource_type: &ResourceType, issue_code: &str) -> RiskLevel {
        self.risk.get(issue_code).copied().unwrap_or(RiskLevel::Low)
    }

    pub fn classify(&self, finding: &Finding) -> RiskAssessment {
        RiskAssessment {
            finding_id: finding.id.clone(),
            risk_level: self.risk_level(&finding.resource_type, &finding.issue_code),
        }
    }

    /// Advisory steps for a finding; no side effects
    pub fn advise(&self, finding: &Finding) -> RemediationPlan {
        self.steps_for(&finding.resource_type, &finding.issue_code)
    }

    pub fn steps_for(&self, resource_type: &ResourceType, issue_code: &str) -> RemediationPlan {
        if let Some(steps) = self
            .advice
            .get(&(resource_type.clone(), issue_code.to_string()))
        {
            return steps.clone();
        }

        match self.type_fallback.get(resource_type) {
            Some(step) => vec![step.clone()],
            None => self.generic.clone(),
        }
    }
}
