//! Types for live remediation results

use serde::{Deserialize, Serialize};

/// Result of the public-access-block step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOutcome {
    Applied,
    Failed,
}

/// Result of the bucket-policy step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PolicyOutcome {
    /// The bucket has no policy
    NoPolicy,
    /// Nothing public to remove, no write performed
    Unchanged,
    /// Public statements removed and the policy written back
    Rewritten { removed: usize },
    /// Every statement was public; the policy was deleted
    Deleted { removed: usize },
    Failed,
}

/// A sub-step that failed without aborting its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

/// What the actuator did to one bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationReport {
    pub bucket: String,
    pub public_access_block: BlockOutcome,
    pub policy: PolicyOutcome,
    pub failures: Vec<StepFailure>,
}

impl ActuationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
