//! Agent liveness registry.
//!
//! Stores the last time each agent was heard from. Liveness is derived on
//! read from a staleness threshold; nothing sweeps the table.

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use bastion_db::{Agent, Attributes, BastionDb};
use bastion_protocol::defaults::DEFAULT_AGENT_STATUS;
use bastion_protocol::BastionConfig;
use bastion_security::secrets_match;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Fields an agent supplies when registering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub capabilities: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    pub status: Option<String>,
}

/// Shared-secret policy for agents registering themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Registration is refused while unset.
    pub shared_secret: Option<String>,
    pub default_port: u16,
}

impl RegistrationPolicy {
    pub fn from_config(config: &BastionConfig) -> Self {
        Self {
            shared_secret: config.agents.registration_secret.clone(),
            default_port: config.agents.default_port,
        }
    }
}

/// An agent together with its derived liveness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: Agent,
    pub alive: bool,
}

#[derive(Debug, Clone)]
pub struct AgentRegistry {
    db: BastionDb,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    policy: RegistrationPolicy,
}

impl AgentRegistry {
    pub fn new(
        db: BastionDb,
        clock: Arc<dyn Clock>,
        stale_after: std::time::Duration,
        policy: RegistrationPolicy,
    ) -> Self {
        Self {
            db,
            clock,
            stale_after: Duration::from_std(stale_after).unwrap_or_else(|_| Duration::weeks(52 * 100)),
            policy,
        }
    }

    /// Upsert by name, overwriting every field and refreshing last-seen.
    pub async fn register_or_update(&self, registration: AgentRegistration) -> Result<Agent> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(CoreError::invalid_request("agent name must not be empty"));
        }

        let agent = Agent {
            name: name.to_string(),
            host: registration.host,
            port: registration.port,
            status: registration
                .status
                .unwrap_or_else(|| DEFAULT_AGENT_STATUS.to_string()),
            capabilities: registration.capabilities,
            metadata: registration.metadata,
            last_seen: self.clock.now(),
        };
        self.db.agent_upsert(&agent).await?;

        info!(
            agent = %agent.name,
            host = agent.host.as_deref().unwrap_or("-"),
            port = agent.port.unwrap_or(0),
            "Agent registered"
        );
        Ok(agent)
    }

    /// Refresh status, metadata and last-seen. An unknown agent is created
    /// with empty capabilities rather than rejected.
    pub async fn heartbeat(
        &self,
        name: &str,
        status: Option<&str>,
        metadata: Attributes,
    ) -> Result<Agent> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::invalid_request("agent name must not be empty"));
        }

        let status = status.unwrap_or(DEFAULT_AGENT_STATUS);
        self.db
            .agent_touch(name, status, &metadata, self.clock.now())
            .await?;

        self.get(name).await
    }

    pub async fn get(&self, name: &str) -> Result<Agent> {
        self.db
            .agent_get(name)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Agent {}", name)))
    }

    /// Full snapshot, ordered by name.
    pub async fn list(&self) -> Result<Vec<Agent>> {
        Ok(self.db.agent_list().await?)
    }

    pub async fn list_with_liveness(&self) -> Result<Vec<AgentView>> {
        let now = self.clock.now();
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|agent| AgentView {
                alive: self.is_alive_at(&agent, now),
                agent,
            })
            .collect())
    }

    pub fn is_alive(&self, agent: &Agent) -> bool {
        self.is_alive_at(agent, self.clock.now())
    }

    fn is_alive_at(&self, agent: &Agent, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(agent.last_seen) <= self.stale_after
    }

    /// Registration presented by the agent itself.
    ///
    /// The shared secret must match configuration. A missing host is taken
    /// from the connecting peer and a missing port from the configured default.
    pub async fn self_register(
        &self,
        presented_secret: Option<&str>,
        peer_host: Option<&str>,
        mut registration: AgentRegistration,
    ) -> Result<Agent> {
        self.check_registration_secret(presented_secret, &registration.name)?;

        if registration.host.as_deref().map_or(true, str::is_empty) {
            registration.host = peer_host.map(str::to_string);
        }
        registration.port.get_or_insert(self.policy.default_port);

        self.register_or_update(registration).await
    }

    /// Heartbeat presented by the agent itself, gated like [`self_register`](Self::self_register).
    pub async fn self_heartbeat(
        &self,
        presented_secret: Option<&str>,
        name: &str,
        status: Option<&str>,
        metadata: Attributes,
    ) -> Result<Agent> {
        self.check_registration_secret(presented_secret, name)?;
        self.heartbeat(name, status, metadata).await
    }

    fn check_registration_secret(&self, presented: Option<&str>, agent: &str) -> Result<()> {
        let Some(expected) = self.policy.shared_secret.as_deref() else {
            warn!(agent, "Self-registration attempted but no registration secret is configured");
            return Err(CoreError::RegistrationRejected(
                "agent registration is not enabled on this server".into(),
            ));
        };

        match presented {
            Some(secret) if secrets_match(secret, expected) => Ok(()),
            Some(_) => {
                warn!(agent, "Agent presented a wrong registration secret");
                Err(CoreError::RegistrationRejected("invalid registration secret".into()))
            }
            None => {
                warn!(agent, "Agent registered without a registration secret");
                Err(CoreError::RegistrationRejected("missing registration secret".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    async fn new_registry(secret: Option<&str>) -> (AgentRegistry, Arc<ManualClock>) {
        let db = BastionDb::open_in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(start()));
        let registry = AgentRegistry::new(
            db,
            clock.clone(),
            std::time::Duration::from_secs(90),
            RegistrationPolicy {
                shared_secret: secret.map(str::to_string),
                default_port: 7614,
            },
        );
        (registry, clock)
    }

    fn registration(name: &str) -> AgentRegistration {
        AgentRegistration {
            name: name.to_string(),
            capabilities: json!({"shell": "bash"}).as_object().cloned().unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn heartbeat_creates_unknown_agent() {
        let (registry, _) = new_registry(None).await;
        let agent = registry
            .heartbeat("ghost", None, Attributes::new())
            .await
            .unwrap();

        assert_eq!(agent.status, "online");
        assert!(agent.capabilities.is_empty());
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn liveness_follows_last_seen() {
        let (registry, clock) = new_registry(None).await;
        registry.register_or_update(registration("web-1")).await.unwrap();

        clock.advance(Duration::seconds(60));
        let views = registry.list_with_liveness().await.unwrap();
        assert!(views[0].alive);

        clock.advance(Duration::seconds(31));
        let agent = registry.get("web-1").await.unwrap();
        assert!(!registry.is_alive(&agent));

        registry.heartbeat("web-1", Some("online"), Attributes::new()).await.unwrap();
        let agent = registry.get("web-1").await.unwrap();
        assert!(registry.is_alive(&agent));
        // Heartbeat keeps what registration recorded.
        assert_eq!(agent.capabilities["shell"], json!("bash"));
    }

    #[tokio::test]
    async fn self_register_fills_address() {
        let (registry, _) = new_registry(Some("let-me-in")).await;
        let agent = registry
            .self_register(Some("let-me-in"), Some("192.0.2.10"), registration("db-1"))
            .await
            .unwrap();
        assert_eq!(agent.host.as_deref(), Some("192.0.2.10"));
        assert_eq!(agent.port, Some(7614));

        let mut explicit = registration("db-2");
        explicit.host = Some("db-2.internal".into());
        explicit.port = Some(9100);
        let agent = registry
            .self_register(Some("let-me-in"), Some("192.0.2.11"), explicit)
            .await
            .unwrap();
        assert_eq!(agent.host.as_deref(), Some("db-2.internal"));
        assert_eq!(agent.port, Some(9100));
    }

    #[tokio::test]
    async fn self_register_requires_secret() {
        let (registry, _) = new_registry(Some("let-me-in")).await;
        for presented in [None, Some("guess")] {
            let err = registry
                .self_register(presented, None, registration("db-1"))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 403);
        }
        assert!(registry.list().await.unwrap().is_empty());

        let (unconfigured, _) = new_registry(None).await;
        let err = unconfigured
            .self_heartbeat(Some("anything"), "db-1", None, Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::RegistrationRejected(_)));
    }

    #[tokio::test]
    async fn get_unknown_agent_is_not_found() {
        let (registry, _) = new_registry(None).await;
        assert!(matches!(registry.get("nope").await, Err(CoreError::NotFound(_))));
    }
}
