//! Error taxonomy shared by the finding handlers
//!
//! Callers branch on the variant, never on message text. Every variant maps
//! to a handler status code so entry points can always answer with a
//! structured result.

use thiserror::Error;

/// Errors surfaced by finding processing and the credential sweep
#[derive(Debug, Error)]
pub enum GuardError {
    /// Missing or malformed event fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced finding (or request) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A single actuator sub-step failed; sibling steps still ran
    #[error("Remediation step '{step}' failed: {message}")]
    RemediationStep { step: String, message: String },

    /// Anything uncategorized
    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

impl GuardError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GuardError::Validation(msg.into())
    }

    pub fn step(step: impl Into<String>, err: impl std::fmt::Display) -> Self {
        GuardError::RemediationStep {
            step: step.into(),
            message: err.to_string(),
        }
    }

    /// Status code used in the handler result.
    ///
    /// Step failures are best-effort successes: the handler still reports 200
    /// and lists the failure in the body.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::Validation(_) => 400,
            GuardError::NotFound(_) => 404,
            GuardError::RemediationStep { .. } => 200,
            GuardError::Unexpected(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "validation_error",
            GuardError::NotFound(_) => "not_found",
            GuardError::RemediationStep { .. } => "remediation_step_failure",
            GuardError::Unexpected(_) => "unexpected_failure",
        }
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        GuardError::Unexpected(format!("{:#}", err))
    }
}
