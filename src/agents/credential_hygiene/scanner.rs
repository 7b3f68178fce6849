//! Stale access-key sweep
//!
//! Pages through every IAM user, and deactivates each active key older than
//! the threshold. Keys are never deleted. Users are processed concurrently
//! with bounded parallelism; one failing user does not stop the sweep.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use super::iam::AccessKeyApi;
use super::types::{DisabledKey, KeyStatus, ScanFailure, ScanReport};
use crate::error::GuardError;

pub const DEFAULT_MAX_AGE_DAYS: i64 = 90;
pub const DEFAULT_SCAN_CONCURRENCY: usize = 8;

/// Outcome for a single user
#[derive(Default)]
struct UserOutcome {
    keys_examined: usize,
    disabled: Vec<DisabledKey>,
    failures: Vec<ScanFailure>,
}

pub struct CredentialScanner {
    iam: Arc<dyn AccessKeyApi>,
    max_age_days: i64,
    concurrency: usize,
}

impl CredentialScanner {
    pub fn new(iam: Arc<dyn AccessKeyApi>) -> Self {
        Self {
            iam,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }

    pub fn with_max_age_days(mut self, days: i64) -> Self {
        self.max_age_days = days;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self) -> Result<ScanReport, GuardError> {
        self.run_at(Utc::now()).await
    }

    /// Sweep with an explicit clock reading
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ScanReport, GuardError> {
        info!(
            threshold_days = %self.max_age_days,
            concurrency = %self.concurrency,
            "Starting access key sweep"
        );

        let users = self.all_users().await?;
        let users_scanned = users.len();

        let outcomes: Vec<UserOutcome> = stream::iter(users)
            .map(|user| self.scan_user(user, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut keys_examined = 0;
        let mut disabled = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            keys_examined += outcome.keys_examined;
            disabled.extend(outcome.disabled);
            failures.extend(outcome.failures);
        }

        // buffer_unordered completes in any order
        disabled.sort_by(|a, b| (&a.user, &a.key_id).cmp(&(&b.user, &b.key_id)));
        failures.sort_by(|a, b| (&a.user, &a.key_id).cmp(&(&b.user, &b.key_id)));

        info!(
            users = %users_scanned,
            keys = %keys_examined,
            disabled = %disabled.len(),
            failures = %failures.len(),
            "Access key sweep finished"
        );

        Ok(ScanReport {
            users_scanned,
            keys_examined,
            disabled_count: disabled.len(),
            disabled,
            failures,
            threshold_days: self.max_age_days,
            completed_at: Utc::now(),
        })
    }

    async fn all_users(&self) -> Result<Vec<String>, GuardError> {
        let mut users = Vec::new();
        let mut marker = None;

        loop {
            let page = self.iam.list_users(marker).await?;
            users.extend(page.users);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(users)
    }

    async fn scan_user(&self, user: String, now: DateTime<Utc>) -> UserOutcome {
        let mut outcome = UserOutcome::default();

        let keys = match self.iam.list_access_keys(&user).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to list access keys, skipping user");
                outcome.failures.push(ScanFailure {
                    user,
                    key_id: None,
                    message: format!("{:#}", e),
                });
                return outcome;
            }
        };

        for key in keys {
            outcome.keys_examined += 1;
            if key.status != KeyStatus::Active {
                continue;
            }

            let age_days = key.age_days(now);
            if age_days <= self.max_age_days {
                continue;
            }

            match self.iam.deactivate_key(&user, &key.key_id).await {
                Ok(()) => {
                    info!(user = %user, key = %key.key_id, age_days = %age_days, "Deactivated stale access key");
                    outcome.disabled.push(DisabledKey {
                        user: user.clone(),
                        key_id: key.key_id,
                        age_days,
                    });
                }
                Err(e) => {
                    warn!(user = %user, key = %key.key_id, error = %e, "Failed to deactivate access key");
                    outcome.failures.push(ScanFailure {
                        user: user.clone(),
                        key_id: Some(key.key_id),
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        outcome
    }
}
