//! Access Analyzer finding types
//!
//! Findings are produced by the external analyzer and are read-only here.

use serde::{Deserialize, Serialize};

/// Resource type reported on a finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    IamRole,
    IamUser,
    S3Bucket,
    KmsKey,
    Other(String),
}

impl ResourceType {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceType::IamRole => "AWS::IAM::Role",
            ResourceType::IamUser => "AWS::IAM::User",
            ResourceType::S3Bucket => "AWS::S3::Bucket",
            ResourceType::KmsKey => "AWS::KMS::Key",
            ResourceType::Other(s) => s,
        }
    }
}

impl From<&str> for ResourceType {
    fn from(s: &str) -> Self {
        match s {
            "AWS::IAM::Role" => ResourceType::IamRole,
            "AWS::IAM::User" => ResourceType::IamUser,
            "AWS::S3::Bucket" => ResourceType::S3Bucket,
            "AWS::KMS::Key" => ResourceType::KmsKey,
            other => ResourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        ResourceType::from(s.as_str())
    }
}

impl From<ResourceType> for String {
    fn from(rt: ResourceType) -> Self {
        rt.as_str().to_string()
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// A validated Access Analyzer finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    /// Absent when the finding arrived embedded in the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_arn: Option<String>,
    pub resource_type: ResourceType,
    /// Resource ARN
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub issue_code: String,
}

/// Risk derived from a finding, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub finding_id: String,
    pub risk_level: RiskLevel,
}

/// Ordered advisory steps
pub type RemediationPlan = Vec<String>;

/// Body returned by the finding handler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingReport {
    pub finding_id: String,
    pub resource_type: ResourceType,
    pub status: String,
    pub issue_code: String,
    pub risk_level: RiskLevel,
    pub remediation: RemediationPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuation: Option<crate::agents::remediation::ActuationReport>,
}
