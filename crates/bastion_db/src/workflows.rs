//! Workflow storage and guarded state transitions.
//!
//! Every mutation runs in one transaction that starts with a status-guarded
//! `UPDATE workflows`. That statement takes SQLite's write lock before any
//! read, so the check and the change cannot interleave with another writer.
//! The audit entry for the mutation is appended inside the same transaction.
//!
//! Execution is two-phase. `workflow_claim_execution` stamps an approved
//! workflow with an execution id before any process starts; only the holder
//! of that id can record the outcome, and no other transition applies while
//! the claim stands.

use crate::audit::insert_audit;
use crate::error::{DbError, Result};
use crate::types::{Approval, ApprovalTally, AuditRecord, Workflow, WorkflowStatus};
use crate::BastionDb;
use bastion_ids::{ExecutionId, WorkflowId};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

impl BastionDb {
    /// Persist a new workflow with its targets and its `created` audit entry.
    pub async fn workflow_insert(&self, workflow: &Workflow, audit: &AuditRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, script_id, requestor, status, required_approval_levels,
                notify_email, reason, created_at, expires_at, last_update
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workflow.id.as_str())
        .bind(&workflow.script_id)
        .bind(&workflow.requestor)
        .bind(workflow.status.as_str())
        .bind(i64::from(workflow.required_approval_levels))
        .bind(&workflow.notify_email)
        .bind(&workflow.reason)
        .bind(workflow.created_at.timestamp_millis())
        .bind(workflow.expires_at.timestamp_millis())
        .bind(workflow.last_update.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for (position, target) in workflow.targets.iter().enumerate() {
            sqlx::query("INSERT INTO workflow_targets (workflow_id, position, target) VALUES (?, ?, ?)")
                .bind(workflow.id.as_str())
                .bind(position as i64)
                .bind(target)
                .execute(&mut *tx)
                .await?;
        }

        insert_audit(&mut *tx, &workflow.id, audit, workflow.created_at).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn workflow_get(&self, id: &WorkflowId) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate_workflow(&row).await?)),
            None => Ok(None),
        }
    }

    /// Most recently created first.
    pub async fn workflow_list(&self, limit: u32) -> Result<Vec<Workflow>> {
        let rows = sqlx::query("SELECT * FROM workflows ORDER BY created_at DESC, rowid DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in &rows {
            workflows.push(self.hydrate_workflow(row).await?);
        }
        Ok(workflows)
    }

    /// Ids of open workflows whose deadline passed before `now`, oldest deadline first.
    pub async fn workflow_list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM workflows WHERE status IN ('pending', 'approved') AND expires_at < ? ORDER BY expires_at",
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        ids.iter().map(|id| parse_workflow_id(id)).collect()
    }

    /// Move a workflow from one of `from` to `to` and append `audit`.
    ///
    /// Fails with `NotFound` for an unknown id and `InvalidState` when the
    /// current status is not in `from` or an execution holds the workflow;
    /// nothing is written in either case.
    pub async fn workflow_transition(
        &self,
        id: &WorkflowId,
        from: &[WorkflowStatus],
        to: WorkflowStatus,
        audit: &AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if from.is_empty() {
            return Err(DbError::invalid_state(format!(
                "No source state allows '{}' on workflow {}",
                audit.action, id
            )));
        }

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE workflows SET status = ?, last_update = ? \
             WHERE id = ? AND claimed_at IS NULL AND status IN ({})",
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(now.timestamp_millis())
            .bind(id.as_str());
        for status in from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&mut *tx).await?;

        if result.rows_affected() == 0 {
            let err = guard_failure(&mut *tx, id, audit.action.as_str()).await;
            tx.rollback().await?;
            return Err(err);
        }

        insert_audit(&mut *tx, id, audit, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Reserve an approved workflow for `execution`.
    ///
    /// Succeeds for exactly one caller across every handle on the database.
    /// Losers get `InvalidState` and must not start the script.
    pub async fn workflow_claim_execution(
        &self,
        id: &WorkflowId,
        execution: &ExecutionId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE workflows SET execution_id = ?, claimed_at = ? \
             WHERE id = ? AND status = 'approved' AND claimed_at IS NULL",
        )
        .bind(execution.as_str())
        .bind(now.timestamp_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let err = guard_failure(&mut *tx, id, "execute").await;
            tx.rollback().await?;
            return Err(err);
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record the outcome of a claimed execution: move the workflow to `to`,
    /// clear the claim and append `audit`.
    pub async fn workflow_finish_execution(
        &self,
        id: &WorkflowId,
        execution: &ExecutionId,
        to: WorkflowStatus,
        audit: &AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE workflows SET status = ?, last_update = ?, claimed_at = NULL \
             WHERE id = ? AND status = 'approved' AND execution_id = ? AND claimed_at IS NOT NULL",
        )
        .bind(to.as_str())
        .bind(now.timestamp_millis())
        .bind(id.as_str())
        .bind(execution.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::invalid_state(format!(
                "Workflow {} is not claimed by execution {}",
                id, execution
            )));
        }

        insert_audit(&mut *tx, id, audit, now).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record `approver`'s sign-off and promote to `approved` once the
    /// distinct-approver count reaches the required level.
    ///
    /// A repeat approval leaves the count unchanged but still appends `audit`.
    pub async fn workflow_record_approval(
        &self,
        id: &WorkflowId,
        approver: &str,
        audit: &AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<ApprovalTally> {
        let mut tx = self.pool.begin().await?;
        let now_ms = now.timestamp_millis();

        let guard = sqlx::query(
            "UPDATE workflows SET last_update = ? \
             WHERE id = ? AND claimed_at IS NULL AND status IN ('pending', 'approved')",
        )
        .bind(now_ms)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            let err = guard_failure(&mut *tx, id, audit.action.as_str()).await;
            tx.rollback().await?;
            return Err(err);
        }

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO workflow_approvals (workflow_id, approver, level, approved_at)
            VALUES (?, ?, (SELECT COUNT(*) + 1 FROM workflow_approvals WHERE workflow_id = ?), ?)
            "#,
        )
        .bind(id.as_str())
        .bind(approver)
        .bind(id.as_str())
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM workflow_approvals WHERE workflow_id = ?")
                .bind(id.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let row = sqlx::query("SELECT status, required_approval_levels FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let mut status = parse_status(row.get("status"))?;
        let required: i64 = row.get("required_approval_levels");

        if status == WorkflowStatus::Pending && count >= required {
            sqlx::query("UPDATE workflows SET status = 'approved' WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            status = WorkflowStatus::Approved;
        }

        insert_audit(&mut *tx, id, audit, now).await?;
        tx.commit().await?;

        Ok(ApprovalTally {
            count: count as u32,
            required: required as u32,
            status,
            newly_recorded: inserted.rows_affected() == 1,
        })
    }

    async fn hydrate_workflow(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Workflow> {
        let id = parse_workflow_id(row.get("id"))?;

        let targets: Vec<String> = sqlx::query_scalar(
            "SELECT target FROM workflow_targets WHERE workflow_id = ? ORDER BY position",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let approval_rows = sqlx::query(
            "SELECT approver, level, approved_at FROM workflow_approvals WHERE workflow_id = ? ORDER BY level",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let approvals = approval_rows
            .iter()
            .map(|r| Approval {
                approver: r.get("approver"),
                level: r.get::<i64, _>("level") as u32,
                approved_at: BastionDb::millis_to_datetime(r.get("approved_at")),
            })
            .collect();

        Ok(Workflow {
            id,
            script_id: row.get("script_id"),
            targets,
            requestor: row.get("requestor"),
            status: parse_status(row.get("status"))?,
            required_approval_levels: row.get::<i64, _>("required_approval_levels") as u32,
            approvals,
            notify_email: row.get("notify_email"),
            reason: row.get("reason"),
            created_at: BastionDb::millis_to_datetime(row.get("created_at")),
            expires_at: BastionDb::millis_to_datetime(row.get("expires_at")),
            last_update: BastionDb::millis_to_datetime(row.get("last_update")),
        })
    }
}

/// Explain why a status-guarded update touched no rows.
async fn guard_failure(conn: &mut SqliteConnection, id: &WorkflowId, action: &str) -> DbError {
    let current: std::result::Result<Option<(String, Option<i64>)>, sqlx::Error> =
        sqlx::query_as("SELECT status, claimed_at FROM workflows WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(conn)
            .await;

    match current {
        Ok(Some((_, Some(_)))) => DbError::invalid_state(format!(
            "Workflow {} is being executed; cannot record '{}'",
            id, action
        )),
        Ok(Some((status, None))) => DbError::invalid_state(format!(
            "Workflow {} is {}; cannot record '{}'",
            id, status, action
        )),
        Ok(None) => DbError::not_found(format!("Workflow {}", id)),
        Err(e) => DbError::Sqlx(e),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_status(raw: &str) -> Result<WorkflowStatus> {
    WorkflowStatus::parse(raw)
        .ok_or_else(|| DbError::corrupt(format!("Unknown workflow status: {}", raw)))
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId> {
    WorkflowId::parse(raw).map_err(|e| DbError::corrupt(e.to_string()))
}
