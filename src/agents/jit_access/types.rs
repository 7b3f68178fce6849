//! JIT access request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Request lifecycle: Requested → ManagerApproved → Granted → Revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JitState {
    Requested,
    ManagerApproved,
    Granted,
    Revoked,
}

impl std::fmt::Display for JitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JitState::Requested => "REQUESTED",
            JitState::ManagerApproved => "MANAGER_APPROVED",
            JitState::Granted => "GRANTED",
            JitState::Revoked => "REVOKED",
        };
        write!(f, "{}", s)
    }
}

/// Why an assignment was (or is being) revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    HoldElapsed,
    Cancelled,
    CeilingReached,
    GrantFailed,
    Manual,
    /// The service stopped while the assignment was held
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JitAccessRequest {
    pub request_id: Uuid,
    /// Identity Center user id of the requester
    pub requester: String,
    /// Permission set ARN to assign
    pub target_permission_set: String,
    pub justification: String,
    pub state: JitState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<RevocationReason>,
    /// Set before the provisioner is called; a partial assignment may exist
    pub grant_attempted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JitAccessRequest {
    pub fn new(requester: &str, target_permission_set: &str, justification: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requester: requester.to_string(),
            target_permission_set: target_permission_set.to_string(),
            justification: justification.to_string(),
            state: JitState::Requested,
            created_at: Utc::now(),
            approved_by: None,
            granted_at: None,
            expires_at: None,
            revoked_at: None,
            revocation_reason: None,
            grant_attempted: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantResult {
    pub granted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeResult {
    pub revoked: bool,
}

/// How one supervised execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    Revoked { reason: RevocationReason },
    /// Nothing was assigned, or someone else already revoked
    NothingToRevoke { reason: RevocationReason },
    /// Revoke could not complete before the ceiling; the operator was alerted
    RevokeFailed { reason: RevocationReason, error: String },
    /// The request could not be started (unknown id, wrong state)
    Aborted { error: String },
}

/// Errors from the JIT workflow
#[derive(Debug, Error)]
pub enum JitError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JIT request not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot {action} request {request_id} in state {from}")]
    InvalidTransition {
        request_id: Uuid,
        from: JitState,
        action: &'static str,
    },

    #[error("Conflicting request: {0}")]
    Conflict(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Failed to persist JIT state: {0}")]
    Persistence(String),

    #[error("Revoke of request {request_id} failed and was escalated: {message}")]
    RevokeEscalated { request_id: Uuid, message: String },
}

impl JitError {
    pub fn status_code(&self) -> u16 {
        match self {
            JitError::Validation(_) => 400,
            JitError::NotFound(_) => 404,
            JitError::InvalidTransition { .. } | JitError::Conflict(_) => 409,
            JitError::Provisioning(_) => 502,
            JitError::Persistence(_) => 500,
            JitError::RevokeEscalated { .. } => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JitError::Validation(_) => "validation_error",
            JitError::NotFound(_) => "not_found",
            JitError::InvalidTransition { .. } => "invalid_transition",
            JitError::Conflict(_) => "conflict",
            JitError::Provisioning(_) => "provisioning_failure",
            JitError::Persistence(_) => "persistence_failure",
            JitError::RevokeEscalated { .. } => "revoke_escalated",
        }
    }
}

impl From<anyhow::Error> for JitError {
    fn from(err: anyhow::Error) -> Self {
        JitError::Provisioning(format!("{:#}", err))
    }
}
