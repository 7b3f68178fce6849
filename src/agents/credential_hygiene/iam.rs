//! IAM access key operations

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::types::StatusType;
use aws_sdk_iam::Client;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::types::{AccessKey, KeyStatus, UserPage};
use crate::tools::aws::is_not_found_code;

/// IAM calls the sweep needs
#[async_trait]
pub trait AccessKeyApi: Send + Sync {
    /// One page of user names, starting at `marker`
    async fn list_users(&self, marker: Option<String>) -> Result<UserPage>;

    /// Every key of one user, all pages
    async fn list_access_keys(&self, user: &str) -> Result<Vec<AccessKey>>;

    /// Set a key to Inactive. Already inactive or gone is success.
    async fn deactivate_key(&self, user: &str, key_id: &str) -> Result<()>;
}

/// aws-sdk-iam backed implementation
pub struct IamAccessKeyClient {
    client: Client,
}

impl IamAccessKeyClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

fn to_chrono(dt: &aws_sdk_iam::primitives::DateTime) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
        .ok_or_else(|| anyhow!("create date out of range: {}", dt))
}

#[async_trait]
impl AccessKeyApi for IamAccessKeyClient {
    async fn list_users(&self, marker: Option<String>) -> Result<UserPage> {
        let output = self
            .client
            .list_users()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| anyhow!("ListUsers failed: {}", e))?;

        let users = output
            .users()
            .iter()
            .map(|u| u.user_name().to_string())
            .collect();
        let next_marker = if output.is_truncated() {
            output.marker().map(|m| m.to_string())
        } else {
            None
        };

        Ok(UserPage { users, next_marker })
    }

    async fn list_access_keys(&self, user: &str) -> Result<Vec<AccessKey>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let output = self
                .client
                .list_access_keys()
                .user_name(user)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| anyhow!("ListAccessKeys failed for {}: {}", user, e))?;

            for meta in output.access_key_metadata() {
                let (Some(key_id), Some(created)) = (meta.access_key_id(), meta.create_date())
                else {
                    debug!(user = %user, "Skipping key metadata without id or create date");
                    continue;
                };
                let status = match meta.status() {
                    Some(StatusType::Active) => KeyStatus::Active,
                    _ => KeyStatus::Inactive,
                };
                keys.push(AccessKey {
                    user_name: user.to_string(),
                    key_id: key_id.to_string(),
                    create_date: to_chrono(created)?,
                    status,
                });
            }

            match (output.is_truncated(), output.marker()) {
                (true, Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn deactivate_key(&self, user: &str, key_id: &str) -> Result<()> {
        let result = self
            .client
            .update_access_key()
            .user_name(user)
            .access_key_id(key_id)
            .status(StatusType::Inactive)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_found_code(e.as_service_error().and_then(|se| se.code())) => {
                debug!(user = %user, key = %key_id, "Key already gone");
                Ok(())
            }
            Err(e) => Err(anyhow!("UpdateAccessKey failed for {}/{}: {}", user, key_id, e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    /// In-memory IAM with a fixed page size for users
    pub struct FakeIam {
        pub keys: Mutex<BTreeMap<String, Vec<AccessKey>>>,
        pub page_size: usize,
        pub failing_users: HashSet<String>,
        pub deactivate_calls: Mutex<usize>,
    }

    impl Default for FakeIam {
        fn default() -> Self {
            Self {
                keys: Mutex::new(BTreeMap::new()),
                page_size: 100,
                failing_users: HashSet::new(),
                deactivate_calls: Mutex::new(0),
            }
        }
    }

    impl FakeIam {
        pub fn add_user(&self, user: &str, keys: Vec<AccessKey>) {
            self.keys.lock().unwrap().insert(user.to_string(), keys);
        }

        pub fn status(&self, user: &str, key_id: &str) -> Option<KeyStatus> {
            self.keys
                .lock()
                .unwrap()
                .get(user)
                .and_then(|keys| keys.iter().find(|k| k.key_id == key_id))
                .map(|k| k.status)
        }

        pub fn deactivations(&self) -> usize {
            *self.deactivate_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl AccessKeyApi for FakeIam {
        async fn list_users(&self, marker: Option<String>) -> Result<UserPage> {
            let start: usize = marker.map(|m| m.parse()).transpose()?.unwrap_or(0);
            let users: Vec<String> = self.keys.lock().unwrap().keys().cloned().collect();
            let end = (start + self.page_size).min(users.len());
            Ok(UserPage {
                users: users[start..end].to_vec(),
                next_marker: (end < users.len()).then(|| end.to_string()),
            })
        }

        async fn list_access_keys(&self, user: &str) -> Result<Vec<AccessKey>> {
            if self.failing_users.contains(user) {
                anyhow::bail!("AccessDenied for {}", user);
            }
            Ok(self.keys.lock().unwrap().get(user).cloned().unwrap_or_default())
        }

        async fn deactivate_key(&self, user: &str, key_id: &str) -> Result<()> {
            *self.deactivate_calls.lock().unwrap() += 1;
            if let Some(key) = self
                .keys
                .lock()
                .unwrap()
                .get_mut(user)
                .and_then(|keys| keys.iter_mut().find(|k| k.key_id == key_id))
            {
                key.status = KeyStatus::Inactive;
            }
            Ok(())
        }
    }
}
