//! Append-only workflow audit trail.
//!
//! Entries are only ever written from inside a workflow mutation's
//! transaction; there is no update or delete path.

use crate::error::{DbError, Result};
use crate::types::{AuditAction, AuditEntry, AuditRecord};
use crate::BastionDb;
use bastion_ids::WorkflowId;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

pub(crate) async fn insert_audit(
    conn: &mut SqliteConnection,
    workflow_id: &WorkflowId,
    record: &AuditRecord,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO workflow_audit (workflow_id, action, actor, ts, note) VALUES (?, ?, ?, ?, ?)")
        .bind(workflow_id.as_str())
        .bind(record.action.as_str())
        .bind(&record.actor)
        .bind(at.timestamp_millis())
        .bind(&record.note)
        .execute(conn)
        .await?;
    Ok(())
}

impl BastionDb {
    /// Audit trail for one workflow, most recent first.
    ///
    /// Entries sharing a millisecond keep their insertion order (newest first).
    pub async fn workflow_audit(&self, workflow_id: &WorkflowId) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, action, actor, ts, note FROM workflow_audit WHERE workflow_id = ? ORDER BY ts DESC, id DESC",
        )
        .bind(workflow_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let action_str: String = row.get("action");
                let action = AuditAction::parse(&action_str).ok_or_else(|| {
                    DbError::corrupt(format!("Unknown audit action: {}", action_str))
                })?;
                Ok(AuditEntry {
                    id: row.get("id"),
                    workflow_id: workflow_id.clone(),
                    action,
                    actor: row.get("actor"),
                    timestamp: BastionDb::millis_to_datetime(row.get("ts")),
                    note: row.get("note"),
                })
            })
            .collect()
    }
}
