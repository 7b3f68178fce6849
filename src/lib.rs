//! IAM Guard Library
//!
//! Event-driven security workers for an AWS organization: Access Analyzer
//! finding triage and remediation, access-key hygiene sweeps, and
//! just-in-time elevated access with guaranteed revocation.

pub mod agents;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod tools;

pub use agents::credential_hygiene::CredentialScanner;
pub use agents::findings::{Finding, RiskLevel, RuleTable};
pub use agents::jit_access::{JitSupervisor, JitWorkflow};
pub use agents::remediation::RemediationActuator;
pub use config::GuardConfig;
pub use error::GuardError;
