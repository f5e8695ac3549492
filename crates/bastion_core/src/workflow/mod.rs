//! The approval state machine.
//!
//! ```text
//! pending ──approve (N distinct)──▶ approved ──execute──▶ success | failed | timed_out
//!    │                                 │
//!    ├──────────── deny ───────────────┼──▶ denied
//!    └──────────── ttl elapsed ────────┴──▶ expired
//! ```
//!
//! Every transition and every approval attempt appends an audit entry in
//! the same transaction as the state change.

mod engine;
mod locks;

pub use engine::{EngineSettings, WorkflowEngine};

use crate::executor::ExecutionOutcome;
use bastion_db::WorkflowStatus;
use bastion_ids::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Parameters for a new workflow. The requestor is the authenticated caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflow {
    pub script_id: String,
    /// Agent names, recorded verbatim and in order.
    pub targets: Vec<String>,
    /// Defaults to the script's policy.
    pub required_approval_levels: Option<u32>,
    pub notify_email: Option<String>,
    /// In TTL units; defaults to the configured TTL.
    pub ttl: Option<u32>,
    pub reason: String,
}

/// Result of an approve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalReceipt {
    pub workflow_id: WorkflowId,
    /// Distinct approvers so far.
    pub approvals: u32,
    pub required: u32,
    pub status: WorkflowStatus,
    /// This approver had already signed off; the count did not change.
    pub duplicate: bool,
}

/// Result of an execute call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    pub status: WorkflowStatus,
    pub outcome: ExecutionOutcome,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub targets: Vec<String>,
}
