//! Types for the access-key hygiene sweep

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Active,
    Inactive,
}

/// IAM access key metadata as read from the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    pub user_name: String,
    pub key_id: String,
    pub create_date: DateTime<Utc>,
    pub status: KeyStatus,
}

impl AccessKey {
    /// Whole days since creation, floored; never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.create_date).num_days().max(0)
    }
}

/// One page of `ListUsers`
#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub users: Vec<String>,
    /// Present when more pages follow
    pub next_marker: Option<String>,
}

/// A key the sweep deactivated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisabledKey {
    pub user: String,
    pub key_id: String,
    pub age_days: i64,
}

/// A user or key the sweep could not process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFailure {
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub message: String,
}

/// Result of one sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub users_scanned: usize,
    pub keys_examined: usize,
    pub disabled_count: usize,
    pub disabled: Vec<DisabledKey>,
    pub failures: Vec<ScanFailure>,
    pub threshold_days: i64,
    pub completed_at: DateTime<Utc>,
}
