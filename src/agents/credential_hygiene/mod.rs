//! Credential Hygiene
//!
//! Scheduled sweep that deactivates IAM access keys older than a threshold.

pub mod iam;
pub mod scanner;
pub mod types;

pub use iam::{AccessKeyApi, IamAccessKeyClient};
pub use scanner::CredentialScanner;
pub use types::{AccessKey, DisabledKey, KeyStatus, ScanFailure, ScanReport};
