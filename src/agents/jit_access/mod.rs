//! Just-In-Time Access
//!
//! Time-bounded elevated access through Identity Center account assignments.
//! A request is submitted, approved by someone other than the requester,
//! granted for a fixed hold and then revoked. Revocation is guaranteed: every
//! exit path of an execution revokes, and a revoke that cannot complete is
//! escalated to the operator. Requests can be kept in a state file so a
//! restarted service revokes what an earlier one granted.

pub mod provisioner;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod workflow;

pub use provisioner::{AssignmentProvisioner, SsoAssignmentProvisioner};
pub use store::JitStore;
pub use supervisor::{JitSupervisor, StopOutcome};
pub use types::{
    GrantResult, JitAccessRequest, JitError, JitState, RevocationReason, RevokeResult, RunOutcome,
};
pub use workflow::{JitPolicy, JitWorkflow};
