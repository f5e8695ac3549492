//! Agent directory.

use crate::error::{DbError, Result};
use crate::types::{Agent, Attributes};
use crate::BastionDb;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl BastionDb {
    /// Insert or fully overwrite an agent row.
    pub async fn agent_upsert(&self, agent: &Agent) -> Result<()> {
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        let metadata = serde_json::to_string(&agent.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO agents (name, host, port, status, capabilities_json, metadata_json, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                status = excluded.status,
                capabilities_json = excluded.capabilities_json,
                metadata_json = excluded.metadata_json,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(&agent.name)
        .bind(&agent.host)
        .bind(agent.port.map(i64::from))
        .bind(&agent.status)
        .bind(capabilities)
        .bind(metadata)
        .bind(agent.last_seen.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Refresh status, metadata and last-seen. An unknown agent is created
    /// with empty capabilities and no address.
    pub async fn agent_touch(
        &self,
        name: &str,
        status: &str,
        metadata: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let metadata = serde_json::to_string(metadata)?;

        sqlx::query(
            r#"
            INSERT INTO agents (name, host, port, status, capabilities_json, metadata_json, last_seen)
            VALUES (?, NULL, NULL, ?, '{}', ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                status = excluded.status,
                metadata_json = excluded.metadata_json,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(name)
        .bind(status)
        .bind(metadata)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn agent_get(&self, name: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_agent).transpose()
    }

    pub async fn agent_list(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_agent).collect()
    }
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent> {
    let name: String = row.get("name");
    let port = row
        .get::<Option<i64>, _>("port")
        .map(|p| {
            u16::try_from(p).map_err(|_| DbError::corrupt(format!("Agent {} has port {}", name, p)))
        })
        .transpose()?;

    Ok(Agent {
        host: row.get("host"),
        port,
        status: row.get("status"),
        capabilities: serde_json::from_str(row.get("capabilities_json"))?,
        metadata: serde_json::from_str(row.get("metadata_json"))?,
        last_seen: BastionDb::millis_to_datetime(row.get("last_seen")),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn agent(name: &str) -> Agent {
        Agent {
            name: name.to_string(),
            host: Some("10.0.0.7".to_string()),
            port: Some(7614),
            status: "online".to_string(),
            capabilities: attrs(json!({"os": "linux", "cores": 8})),
            metadata: attrs(json!({"rack": "b2"})),
            last_seen: BastionDb::millis_to_datetime(1_700_000_000_000),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_everything() {
        let db = BastionDb::open_in_memory().await.unwrap();
        db.agent_upsert(&agent("web-1")).await.unwrap();

        let mut changed = agent("web-1");
        changed.host = None;
        changed.port = Some(9000);
        changed.capabilities = Attributes::new();
        changed.status = "draining".to_string();
        db.agent_upsert(&changed).await.unwrap();

        let stored = db.agent_get("web-1").await.unwrap().unwrap();
        assert_eq!(stored, changed);
        assert_eq!(db.agent_list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_touch_unknown_agent_creates_it() {
        let db = BastionDb::open_in_memory().await.unwrap();
        let now = BastionDb::millis_to_datetime(1_700_000_500_000);
        db.agent_touch("db-9", "online", &attrs(json!({"load": 0.4})), now)
            .await
            .unwrap();

        let stored = db.agent_get("db-9").await.unwrap().unwrap();
        assert!(stored.capabilities.is_empty());
        assert_eq!(stored.host, None);
        assert_eq!(stored.port, None);
        assert_eq!(stored.metadata["load"], json!(0.4));
        assert_eq!(stored.last_seen, now);
    }

    #[tokio::test]
    async fn test_touch_keeps_address_and_capabilities() {
        let db = BastionDb::open_in_memory().await.unwrap();
        db.agent_upsert(&agent("web-1")).await.unwrap();

        let later = BastionDb::millis_to_datetime(1_700_000_900_000);
        db.agent_touch("web-1", "busy", &Attributes::new(), later)
            .await
            .unwrap();

        let stored = db.agent_get("web-1").await.unwrap().unwrap();
        assert_eq!(stored.status, "busy");
        assert_eq!(stored.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(stored.capabilities["os"], json!("linux"));
        assert!(stored.metadata.is_empty());
        assert_eq!(stored.last_seen, later);
    }
}
