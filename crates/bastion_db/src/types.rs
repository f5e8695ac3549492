//! Domain types persisted by Bastion.
//!
//! Every enum here is stored as its `as_str()` form; the schema's CHECK
//! constraints list the same vocabulary.

use bastion_ids::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque key/value attributes attached to an agent.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Credentials
// ============================================================================

/// The closed role vocabulary a credential is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Approver,
    Requestor,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Approver, Role::Requestor, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Approver => "approver",
            Self::Requestor => "requestor",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "approver" => Some(Self::Approver),
            "requestor" => Some(Self::Requestor),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// True when this role is one of `required`.
    pub fn has_any_of(&self, required: &[Role]) -> bool {
        required.contains(self)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored credential. The secret digest never leaves the database layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub name: String,
    pub role: Role,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
}

// ============================================================================
// Agents
// ============================================================================

/// A registered execution target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub name: String,
    /// Unset for agents first seen through a heartbeat.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub status: String,
    pub capabilities: Attributes,
    pub metadata: Attributes,
    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// Scripts
// ============================================================================

/// A catalogued script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    /// Absolute, or relative to the configured working directory.
    pub file: String,
    pub description: String,
    pub allowed_tags: BTreeSet<String>,
    /// Default approval policy for workflows created against this script.
    pub required_approval_levels: u32,
}

// ============================================================================
// Workflows
// ============================================================================

/// Workflow lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Denied,
    Expired,
    Success,
    Failed,
    TimedOut,
}

impl WorkflowStatus {
    /// States in which approve/deny are accepted.
    pub const OPEN: [WorkflowStatus; 2] = [WorkflowStatus::Pending, WorkflowStatus::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "expired" => Some(Self::Expired),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        !Self::OPEN.contains(self)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One distinct approver's sign-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub approver: String,
    /// 1 for the first distinct approver, 2 for the second, and so on.
    pub level: u32,
    pub approved_at: DateTime<Utc>,
}

/// An approval-gated request to run a script against a set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: WorkflowId,
    pub script_id: String,
    pub targets: Vec<String>,
    pub requestor: String,
    pub status: WorkflowStatus,
    pub required_approval_levels: u32,
    /// Ordered by level.
    pub approvals: Vec<Approval>,
    pub notify_email: Option<String>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl Workflow {
    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_approval_from(&self, approver: &str) -> bool {
        self.approvals.iter().any(|a| a.approver == approver)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Result of recording an approval inside its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTally {
    /// Distinct approvers after this call.
    pub count: u32,
    pub required: u32,
    pub status: WorkflowStatus,
    /// False when the approver had already signed off.
    pub newly_recorded: bool,
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Approved,
    Denied,
    Executed,
    Expired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Executed => "executed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "executed" => Some(Self::Executed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An audit entry waiting to be written alongside a state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: String,
    pub note: String,
}

impl AuditRecord {
    pub fn new(action: AuditAction, actor: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            action,
            actor: actor.into(),
            note: note.into(),
        }
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub action: AuditAction,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse(" Admin "), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_role_membership() {
        assert!(Role::Approver.has_any_of(&[Role::Admin, Role::Approver]));
        assert!(!Role::Viewer.has_any_of(&[Role::Admin, Role::Approver]));
        assert!(!Role::Admin.has_any_of(&[]));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Approved.is_terminal());
        for status in [
            WorkflowStatus::Denied,
            WorkflowStatus::Expired,
            WorkflowStatus::Success,
            WorkflowStatus::Failed,
            WorkflowStatus::TimedOut,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_status_serde_matches_storage_form() {
        let json = serde_json::to_string(&WorkflowStatus::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
        assert_eq!(WorkflowStatus::parse("timed_out"), Some(WorkflowStatus::TimedOut));
    }
}
