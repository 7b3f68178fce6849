//! Identity Center account assignments
//!
//! Create and delete run asynchronously in Identity Center. Both calls poll
//! the operation status until it settles, so `Ok` means the assignment is
//! really in place (or really gone).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ssoadmin::error::ProvideErrorMetadata;
use aws_sdk_ssoadmin::types::{
    AccountAssignmentOperationStatus, PrincipalType, StatusValues, TargetType,
};
use aws_sdk_ssoadmin::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::types::JitAccessRequest;
use crate::tools::aws::is_not_found_code;

pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_STATUS_POLL_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates and removes the elevated assignment for a request
#[async_trait]
pub trait AssignmentProvisioner: Send + Sync {
    async fn assign(&self, request: &JitAccessRequest) -> Result<()>;

    /// Removing an assignment that does not exist is success.
    ///
    /// An assignment is keyed by (principal, permission set, account), not
    /// by request: removing it also removes a standing assignment of the same
    /// permission set. The workflow refuses overlapping requests for one
    /// pair, but standing assignments must not use JIT permission sets.
    async fn unassign(&self, request: &JitAccessRequest) -> Result<()>;
}

/// State of one asynchronous create or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

impl OperationStatus {
    pub fn from_sdk(status: Option<&AccountAssignmentOperationStatus>) -> Self {
        match status.and_then(|s| s.status()) {
            Some(StatusValues::Succeeded) => OperationStatus::Succeeded,
            Some(StatusValues::Failed) => OperationStatus::Failed(
                status
                    .and_then(|s| s.failure_reason())
                    .unwrap_or("no reason given")
                    .to_string(),
            ),
            _ => OperationStatus::InProgress,
        }
    }
}

/// Poll `describe` until the operation settles. `FAILED`, a missing request
/// id, or no result within `timeout` are errors.
pub async fn await_operation<F, Fut>(
    operation: &str,
    first: OperationStatus,
    request_id: Option<&str>,
    interval: Duration,
    timeout: Duration,
    mut describe: F,
) -> Result<()>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<OperationStatus>>,
{
    let deadline = Instant::now() + timeout;
    let mut status = first;
    loop {
        match status {
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed(reason) => bail!("{} failed: {}", operation, reason),
            OperationStatus::InProgress => {
                let Some(request_id) = request_id else {
                    bail!("{} returned no request id to track", operation);
                };
                if Instant::now() + interval > deadline {
                    bail!(
                        "{} still in progress after {:?} (request {})",
                        operation,
                        timeout,
                        request_id
                    );
                }
                sleep(interval).await;
                status = describe(request_id.to_string()).await?;
                debug!(operation = %operation, request = %request_id, status = ?status, "Polled assignment status");
            }
        }
    }
}

/// aws-sdk-ssoadmin backed provisioner, one target account
pub struct SsoAssignmentProvisioner {
    client: Client,
    instance_arn: String,
    account_id: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl SsoAssignmentProvisioner {
    pub fn new(config: &SdkConfig, instance_arn: &str, account_id: &str) -> Self {
        Self {
            client: Client::new(config),
            instance_arn: instance_arn.to_string(),
            account_id: account_id.to_string(),
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            poll_timeout: DEFAULT_STATUS_POLL_TIMEOUT,
        }
    }

    pub fn with_status_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    async fn creation_status(&self, request_id: String) -> Result<OperationStatus> {
        let output = self
            .client
            .describe_account_assignment_creation_status()
            .instance_arn(&self.instance_arn)
            .account_assignment_creation_request_id(request_id)
            .send()
            .await
            .map_err(|e| anyhow!("DescribeAccountAssignmentCreationStatus failed: {}", e))?;
        Ok(OperationStatus::from_sdk(
            output.account_assignment_creation_status(),
        ))
    }

    async fn deletion_status(&self, request_id: String) -> Result<OperationStatus> {
        let output = self
            .client
            .describe_account_assignment_deletion_status()
            .instance_arn(&self.instance_arn)
            .account_assignment_deletion_request_id(request_id)
            .send()
            .await
            .map_err(|e| anyhow!("DescribeAccountAssignmentDeletionStatus failed: {}", e))?;
        Ok(OperationStatus::from_sdk(
            output.account_assignment_deletion_status(),
        ))
    }
}

#[async_trait]
impl AssignmentProvisioner for SsoAssignmentProvisioner {
    async fn assign(&self, request: &JitAccessRequest) -> Result<()> {
        let output = self
            .client
            .create_account_assignment()
            .instance_arn(&self.instance_arn)
            .target_id(&self.account_id)
            .target_type(TargetType::AwsAccount)
            .permission_set_arn(&request.target_permission_set)
            .principal_type(PrincipalType::User)
            .principal_id(&request.requester)
            .send()
            .await
            .map_err(|e| anyhow!("CreateAccountAssignment failed: {}", e))?;

        let status = output.account_assignment_creation_status();
        await_operation(
            "CreateAccountAssignment",
            OperationStatus::from_sdk(status),
            status.and_then(|s| s.request_id()),
            self.poll_interval,
            self.poll_timeout,
            |id| self.creation_status(id),
        )
        .await?;

        info!(
            request = %request.request_id,
            principal = %request.requester,
            permission_set = %request.target_permission_set,
            account = %self.account_id,
            "Account assignment created"
        );
        Ok(())
    }

    async fn unassign(&self, request: &JitAccessRequest) -> Result<()> {
        let result = self
            .client
            .delete_account_assignment()
            .instance_arn(&self.instance_arn)
            .target_id(&self.account_id)
            .target_type(TargetType::AwsAccount)
            .permission_set_arn(&request.target_permission_set)
            .principal_type(PrincipalType::User)
            .principal_id(&request.requester)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if is_not_found_code(e.as_service_error().and_then(|se| se.code())) => {
                debug!(request = %request.request_id, "Assignment already absent");
                return Ok(());
            }
            Err(e) => return Err(anyhow!("DeleteAccountAssignment failed: {}", e)),
        };

        let status = output.account_assignment_deletion_status();
        await_operation(
            "DeleteAccountAssignment",
            OperationStatus::from_sdk(status),
            status.and_then(|s| s.request_id()),
            self.poll_interval,
            self.poll_timeout,
            |id| self.deletion_status(id),
        )
        .await?;

        info!(
            request = %request.request_id,
            principal = %request.requester,
            account = %self.account_id,
            "Account assignment deleted"
        );
        Ok(())
    }
}
