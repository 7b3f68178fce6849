//! Agent modules for IAM Guard
//!
//! - `findings`: Access Analyzer finding parsing, risk classification and advice
//! - `remediation`: live S3 public-exposure remediation
//! - `credential_hygiene`: scheduled stale access-key sweep
//! - `jit_access`: just-in-time elevated access with guaranteed revocation

pub mod credential_hygiene;
pub mod findings;
pub mod jit_access;
pub mod remediation;

pub use credential_hygiene::CredentialScanner;
pub use jit_access::{JitSupervisor, JitWorkflow};
pub use remediation::RemediationActuator;
