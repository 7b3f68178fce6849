//! Finding processing pipeline
//!
//! event → parse → (lookup) → classify → advise → (actuate)

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::analyzer::FindingSource;
use super::event::{parse_finding_event, FindingEvent};
use super::rules::RuleTable;
use super::types::{Finding, FindingReport};
use crate::agents::remediation::RemediationActuator;
use crate::error::GuardError;

pub struct FindingProcessor {
    rules: Arc<RuleTable>,
    source: Arc<dyn FindingSource>,
    actuator: Option<Arc<RemediationActuator>>,
}

impl FindingProcessor {
    pub fn new(rules: Arc<RuleTable>, source: Arc<dyn FindingSource>) -> Self {
        Self {
            rules,
            source,
            actuator: None,
        }
    }

    /// Enable live remediation for qualifying findings
    pub fn with_actuator(mut self, actuator: Arc<RemediationActuator>) -> Self {
        self.actuator = Some(actuator);
        self
    }

    /// Handle one raw finding event
    pub async fn process_event(&self, event: &Value) -> Result<FindingReport, GuardError> {
        let finding = match parse_finding_event(event)? {
            FindingEvent::Embedded(finding) => finding,
            FindingEvent::Lookup {
                analyzer_arn,
                finding_id,
            } => self
                .source
                .get_finding(&analyzer_arn, &finding_id)
                .await?
                .ok_or_else(|| GuardError::NotFound(format!("Finding {} not found", finding_id)))?,
        };

        self.analyze(&finding).await
    }

    /// Classify, advise and, when the policy says so, actuate
    pub async fn analyze(&self, finding: &Finding) -> Result<FindingReport, GuardError> {
        let assessment = self.rules.classify(finding);
        let remediation = self.rules.advise(finding);

        info!(
            finding = %finding.id,
            resource_type = %finding.resource_type,
            issue_code = %finding.issue_code,
            risk = %assessment.risk_level,
            "Classified finding"
        );

        let actuation = match &self.actuator {
            Some(actuator) if actuator.qualifies(finding, assessment.risk_level) => {
                let report = actuator.remediate(finding).await?;
                if !report.is_clean() {
                    warn!(
                        finding = %finding.id,
                        bucket = %report.bucket,
                        failures = %report.failures.len(),
                        "Remediation completed with failed steps"
                    );
                }
                Some(report)
            }
            _ => None,
        };

        Ok(FindingReport {
            finding_id: finding.id.clone(),
            resource_type: finding.resource_type.clone(),
            status: finding.status.clone(),
            issue_code: finding.issue_code.clone(),
            risk_level: assessment.risk_level,
            remediation,
            actuation,
        })
    }
}
