//! Script catalog storage. Tags live in `script_tags`, one row per tag.

use crate::error::Result;
use crate::types::Script;
use crate::BastionDb;
use sqlx::Row;
use std::collections::{BTreeSet, HashMap};

impl BastionDb {
    /// Replace-by-id upsert. The tag set is rewritten in the same transaction.
    pub async fn script_upsert(&self, script: &Script) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO scripts (id, file, description, required_approval_levels)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                file = excluded.file,
                description = excluded.description,
                required_approval_levels = excluded.required_approval_levels
            "#,
        )
        .bind(&script.id)
        .bind(&script.file)
        .bind(&script.description)
        .bind(i64::from(script.required_approval_levels))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM script_tags WHERE script_id = ?")
            .bind(&script.id)
            .execute(&mut *tx)
            .await?;

        for tag in &script.allowed_tags {
            sqlx::query("INSERT INTO script_tags (script_id, tag) VALUES (?, ?)")
                .bind(&script.id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn script_get(&self, id: &str) -> Result<Option<Script>> {
        let row = sqlx::query("SELECT * FROM scripts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tags: Vec<String> =
            sqlx::query_scalar("SELECT tag FROM script_tags WHERE script_id = ? ORDER BY tag")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        Ok(Some(row_to_script(&row, tags.into_iter().collect())))
    }

    pub async fn script_list(&self) -> Result<Vec<Script>> {
        let rows = sqlx::query("SELECT * FROM scripts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let tag_rows = sqlx::query("SELECT script_id, tag FROM script_tags")
            .fetch_all(&self.pool)
            .await?;

        let mut tags: HashMap<String, BTreeSet<String>> = HashMap::new();
        for row in &tag_rows {
            tags.entry(row.get("script_id"))
                .or_default()
                .insert(row.get("tag"));
        }

        Ok(rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                row_to_script(row, tags.remove(&id).unwrap_or_default())
            })
            .collect())
    }
}

fn row_to_script(row: &sqlx::sqlite::SqliteRow, allowed_tags: BTreeSet<String>) -> Script {
    Script {
        id: row.get("id"),
        file: row.get("file"),
        description: row.get("description"),
        allowed_tags,
        // CHECK (>= 1) keeps this positive.
        required_approval_levels: row.get::<i64, _>("required_approval_levels").max(1) as u32,
    }
}
