//! Credential storage.
//!
//! Only the digest of a secret is persisted; lookups go through the
//! `secret_hash` index.

use crate::error::{DbError, Result};
use crate::types::{Credential, Role};
use crate::BastionDb;
use chrono::{DateTime, Utc};
use sqlx::Row;

const CREDENTIAL_COLUMNS: &str = "name, role, description, created_at, revoked";

impl BastionDb {
    /// Insert or replace a credential by name. Replacing always un-revokes.
    pub async fn credential_upsert(
        &self,
        name: &str,
        secret_hash: &str,
        role: Role,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (name, secret_hash, role, description, created_at, revoked)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(name) DO UPDATE SET
                secret_hash = excluded.secret_hash,
                role = excluded.role,
                description = excluded.description,
                created_at = excluded.created_at,
                revoked = 0
            "#,
        )
        .bind(name)
        .bind(secret_hash)
        .bind(role.as_str())
        .bind(description)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a credential only if the table is empty. Returns whether it was written.
    pub async fn credential_insert_if_none(
        &self,
        name: &str,
        secret_hash: &str,
        role: Role,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO credentials (name, secret_hash, role, description, created_at, revoked)
            SELECT ?, ?, ?, ?, ?, 0
            WHERE NOT EXISTS (SELECT 1 FROM credentials)
            "#,
        )
        .bind(name)
        .bind(secret_hash)
        .bind(role.as_str())
        .bind(description)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a credential revoked. Returns false if no such name exists.
    pub async fn credential_revoke(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE credentials SET revoked = 1 WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Find the non-revoked credential holding this digest.
    pub async fn credential_find_active(&self, secret_hash: &str) -> Result<Option<Credential>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials \
             WHERE secret_hash = ? AND revoked = 0 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_credential).transpose()
    }

    pub async fn credential_get(&self, name: &str) -> Result<Option<Credential>> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_credential).transpose()
    }

    pub async fn credential_list(&self) -> Result<Vec<Credential>> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_credential).collect()
    }

    pub async fn credential_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_credential(row: &sqlx::sqlite::SqliteRow) -> Result<Credential> {
    let role_str: String = row.get("role");
    let role = Role::parse(&role_str)
        .ok_or_else(|| DbError::corrupt(format!("Unknown credential role: {}", role_str)))?;

    Ok(Credential {
        name: row.get("name"),
        role,
        description: row.get("description"),
        created_at: BastionDb::millis_to_datetime(row.get("created_at")),
        revoked: row.get::<i64, _>("revoked") != 0,
    })
}
