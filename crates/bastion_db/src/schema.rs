//! Database schema creation for all Bastion tables.
//!
//! All CREATE TABLE statements live here. Timestamps are epoch milliseconds.

use crate::error::Result;
use crate::BastionDb;
use tracing::info;

impl BastionDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        self.create_credential_tables().await?;
        self.create_agent_tables().await?;
        self.create_script_tables().await?;
        self.create_workflow_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_credential_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS credentials (
                name TEXT PRIMARY KEY,
                secret_hash TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('admin', 'approver', 'requestor', 'viewer')),
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_credentials_hash ON credentials(secret_hash)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_agent_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS agents (
                name TEXT PRIMARY KEY,
                host TEXT,
                port INTEGER CHECK (port IS NULL OR (port > 0 AND port < 65536)),
                status TEXT NOT NULL,
                capabilities_json TEXT NOT NULL DEFAULT '{}',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                last_seen INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_script_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS scripts (
                id TEXT PRIMARY KEY,
                file TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                required_approval_levels INTEGER NOT NULL CHECK (required_approval_levels >= 1)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS script_tags (
                script_id TEXT NOT NULL REFERENCES scripts(id) ON DELETE CASCADE,
                tag TEXT NOT NULL,
                PRIMARY KEY (script_id, tag)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_workflow_tables(&self) -> Result<()> {
        // No foreign key on script_id: catalog rows may vanish under a live workflow.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                script_id TEXT NOT NULL,
                requestor TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN (
                    'pending', 'approved', 'denied', 'expired', 'success', 'failed', 'timed_out'
                )),
                required_approval_levels INTEGER NOT NULL CHECK (required_approval_levels >= 1),
                notify_email TEXT,
                reason TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                last_update INTEGER NOT NULL,
                execution_id TEXT,
                claimed_at INTEGER
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS workflow_targets (
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                target TEXT NOT NULL,
                PRIMARY KEY (workflow_id, position)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS workflow_approvals (
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                approver TEXT NOT NULL,
                level INTEGER NOT NULL,
                approved_at INTEGER NOT NULL,
                PRIMARY KEY (workflow_id, approver)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS workflow_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id TEXT NOT NULL REFERENCES workflows(id),
                action TEXT NOT NULL CHECK (action IN (
                    'created', 'approved', 'denied', 'executed', 'expired'
                )),
                actor TEXT NOT NULL,
                ts INTEGER NOT NULL,
                note TEXT NOT NULL DEFAULT ''
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_created ON workflows(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_status_expiry ON workflows(status, expires_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_audit_wf ON workflow_audit(workflow_id, ts)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
