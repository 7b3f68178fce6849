//! Access Analyzer Findings
//!
//! Parses finding events, resolves the finding when only identifiers were
//! delivered, classifies risk and produces advisory remediation steps.
//! Classification and advice are pure lookups in [`RuleTable`].

pub mod analyzer;
pub mod event;
pub mod processor;
pub mod rules;
pub mod types;

pub use analyzer::{AccessAnalyzerSource, FindingSource};
pub use event::{parse_finding_event, FindingEvent};
pub use processor::FindingProcessor;
pub use rules::{RuleSet, RuleTable};
pub use types::{Finding, FindingReport, RemediationPlan, ResourceType, RiskAssessment, RiskLevel};
