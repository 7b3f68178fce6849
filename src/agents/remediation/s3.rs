//! S3 bucket policy operations

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::types::PublicAccessBlockConfiguration;
use aws_sdk_s3::Client;
use tracing::debug;

use crate::tools::aws::is_not_found_code;

/// Bucket-level mutations the actuator needs
#[async_trait]
pub trait BucketPolicyApi: Send + Sync {
    /// Set all four public-access-block flags
    async fn put_public_access_block(&self, bucket: &str) -> Result<()>;

    /// `Ok(None)` when the bucket has no policy
    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()>;

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()>;
}

/// aws-sdk-s3 backed implementation
pub struct S3BucketPolicyClient {
    client: Client,
}

impl S3BucketPolicyClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl BucketPolicyApi for S3BucketPolicyClient {
    async fn put_public_access_block(&self, bucket: &str) -> Result<()> {
        let block = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .ignore_public_acls(true)
            .block_public_policy(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(block)
            .send()
            .await
            .map_err(|e| anyhow!("PutPublicAccessBlock failed for {}: {}", bucket, e))?;

        debug!(bucket = %bucket, "Public access block applied");
        Ok(())
    }

    async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
        match self.client.get_bucket_policy().bucket(bucket).send().await {
            Ok(output) => Ok(output.policy().map(|p| p.to_string())),
            Err(e) => {
                if is_not_found_code(e.as_service_error().and_then(|se| se.code())) {
                    return Ok(None);
                }
                Err(anyhow!("GetBucketPolicy failed for {}: {}", bucket, e))
            }
        }
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy)
            .send()
            .await
            .map_err(|e| anyhow!("PutBucketPolicy failed for {}: {}", bucket, e))?;
        Ok(())
    }

    async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
        match self.client.delete_bucket_policy().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found_code(e.as_service_error().and_then(|se| se.code())) => Ok(()),
            Err(e) => Err(anyhow!("DeleteBucketPolicy failed for {}: {}", bucket, e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    pub struct BucketState {
        pub blocked: bool,
        pub policy: Option<String>,
        pub policy_writes: usize,
    }

    /// In-memory S3 with failure injection per operation
    #[derive(Default)]
    pub struct FakeS3 {
        pub buckets: Mutex<HashMap<String, BucketState>>,
        pub fail_block: bool,
        pub fail_get_policy: bool,
        pub fail_put_policy: bool,
    }

    impl FakeS3 {
        pub fn with_policy(bucket: &str, policy: Option<String>) -> Self {
            let fake = FakeS3::default();
            fake.buckets.lock().unwrap().insert(
                bucket.to_string(),
                BucketState {
                    policy,
                    ..Default::default()
                },
            );
            fake
        }

        pub fn state(&self, bucket: &str) -> BucketState {
            self.buckets
                .lock()
                .unwrap()
                .get(bucket)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl BucketPolicyApi for FakeS3 {
        async fn put_public_access_block(&self, bucket: &str) -> Result<()> {
            if self.fail_block {
                anyhow::bail!("AccessDenied");
            }
            self.buckets
                .lock()
                .unwrap()
                .entry(bucket.to_string())
                .or_default()
                .blocked = true;
            Ok(())
        }

        async fn get_bucket_policy(&self, bucket: &str) -> Result<Option<String>> {
            if self.fail_get_policy {
                anyhow::bail!("InternalError");
            }
            Ok(self.state(bucket).policy)
        }

        async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
            if self.fail_put_policy {
                anyhow::bail!("MalformedPolicy");
            }
            let mut buckets = self.buckets.lock().unwrap();
            let state = buckets.entry(bucket.to_string()).or_default();
            state.policy = Some(policy.to_string());
            state.policy_writes += 1;
            Ok(())
        }

        async fn delete_bucket_policy(&self, bucket: &str) -> Result<()> {
            let mut buckets = self.buckets.lock().unwrap();
            let state = buckets.entry(bucket.to_string()).or_default();
            state.policy = None;
            state.policy_writes += 1;
            Ok(())
        }
    }
}
