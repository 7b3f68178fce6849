//! Live Remediation
//!
//! Mutates S3 buckets that a finding reports as publicly exposed: applies a
//! full public access block and strips public-allow statements from the
//! bucket policy. Every step is idempotent and best-effort.

pub mod actuator;
pub mod policy;
pub mod s3;
pub mod types;

pub use actuator::{bucket_from_arn, RemediationActuator};
pub use policy::{strip_public_allow, FilteredPolicy};
pub use s3::{BucketPolicyApi, S3BucketPolicyClient};
pub use types::{ActuationReport, BlockOutcome, PolicyOutcome, StepFailure};
