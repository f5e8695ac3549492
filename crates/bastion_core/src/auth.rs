//! Token authority: hashed bearer credentials bound to one role each.

use crate::clock::Clock;
use crate::error::{CoreError, Result};
use bastion_db::{BastionDb, Credential, Role};
use bastion_security::{generate_secret, hash_secret};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name given to the credential created by [`TokenAuthority::bootstrap_admin`].
pub const BOOTSTRAP_ADMIN_NAME: &str = "admin";

/// An operation gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ManageCredentials,
    ManageScripts,
    ReadCatalog,
    ReadAgents,
    CreateWorkflow,
    ReadWorkflows,
    DecideWorkflow,
    ExecuteWorkflow,
    SweepWorkflows,
}

impl Permission {
    /// Roles allowed to perform this operation.
    pub fn allowed_roles(&self) -> &'static [Role] {
        use Role::*;
        match self {
            Self::ManageCredentials | Self::ManageScripts | Self::SweepWorkflows => &[Admin],
            Self::ReadCatalog => &Role::ALL,
            Self::ReadAgents => &[Admin, Viewer],
            Self::CreateWorkflow => &[Admin, Requestor],
            Self::ReadWorkflows => &[Admin, Approver, Viewer],
            Self::DecideWorkflow => &[Admin, Approver],
            Self::ExecuteWorkflow => &[Admin],
        }
    }

    /// Human phrase used in authorization errors.
    pub fn action(&self) -> &'static str {
        match self {
            Self::ManageCredentials => "manage credentials",
            Self::ManageScripts => "manage scripts",
            Self::ReadCatalog => "read the script catalog",
            Self::ReadAgents => "list agents",
            Self::CreateWorkflow => "create workflows",
            Self::ReadWorkflows => "read workflows",
            Self::DecideWorkflow => "approve or deny workflows",
            Self::ExecuteWorkflow => "execute workflows",
            Self::SweepWorkflows => "sweep expired workflows",
        }
    }
}

/// The authenticated caller. Actor identity in the audit trail comes from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct TokenAuthority {
    db: BastionDb,
    clock: Arc<dyn Clock>,
}

impl TokenAuthority {
    pub fn new(db: BastionDb, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Store `hash(secret)` under `name`, replacing any previous credential
    /// of that name and clearing its revocation.
    pub async fn create_credential(
        &self,
        name: &str,
        secret: &str,
        role: Role,
        description: &str,
    ) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::invalid_request("credential name must not be empty"));
        }
        if secret.is_empty() {
            return Err(CoreError::invalid_request("credential secret must not be empty"));
        }

        self.db
            .credential_upsert(name, &hash_secret(secret), role, description, self.clock.now())
            .await?;
        info!(credential = name, role = %role, "Credential stored");
        Ok(())
    }

    /// Create a credential with a freshly generated secret and return the
    /// plaintext. It is not recoverable afterwards.
    pub async fn issue_credential(&self, name: &str, role: Role, description: &str) -> Result<String> {
        let secret = generate_secret();
        self.create_credential(name, &secret, role, description).await?;
        Ok(secret)
    }

    /// Create the first admin credential if, and only if, the store holds none.
    pub async fn bootstrap_admin(&self, name: &str) -> Result<Option<String>> {
        let secret = generate_secret();
        let created = self
            .db
            .credential_insert_if_none(
                name,
                &hash_secret(&secret),
                Role::Admin,
                "bootstrap administrator",
                self.clock.now(),
            )
            .await?;

        if created {
            info!(credential = name, "Bootstrap admin credential created");
            Ok(Some(secret))
        } else {
            debug!("Credentials already exist; bootstrap skipped");
            Ok(None)
        }
    }

    /// Revoke by name. Unknown names are ignored.
    pub async fn revoke(&self, name: &str) -> Result<()> {
        if self.db.credential_revoke(name).await? {
            info!(credential = name, "Credential revoked");
        } else {
            debug!(credential = name, "Revoke of unknown credential ignored");
        }
        Ok(())
    }

    /// True when `secret` belongs to a live credential whose role is in
    /// `required` (or any role, when `required` is `None`).
    ///
    /// Lookup failures of any kind read as `false`.
    pub async fn validate(&self, secret: &str, required: Option<&[Role]>) -> bool {
        match self.lookup(secret).await {
            Ok(Some(cred)) => required.map_or(true, |roles| cred.role.has_any_of(roles)),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed");
                false
            }
        }
    }

    /// Resolve `secret` to a principal allowed to perform `permission`.
    pub async fn authenticate(&self, secret: &str, permission: Permission) -> Result<Principal> {
        let cred = match self.lookup(secret).await? {
            Some(cred) => cred,
            None => {
                warn!(action = permission.action(), "Rejected unknown or revoked credential");
                return Err(CoreError::AuthenticationFailure);
            }
        };

        if !cred.role.has_any_of(permission.allowed_roles()) {
            warn!(
                credential = %cred.name,
                role = %cred.role,
                action = permission.action(),
                "Credential lacks required role"
            );
            return Err(CoreError::AuthorizationFailure {
                role: cred.role,
                action: permission.action(),
            });
        }

        debug!(credential = %cred.name, action = permission.action(), "Authenticated");
        Ok(Principal {
            name: cred.name,
            role: cred.role,
        })
    }

    /// All credentials, revoked ones included. Digests are never exposed.
    pub async fn list(&self) -> Result<Vec<Credential>> {
        Ok(self.db.credential_list().await?)
    }

    async fn lookup(&self, secret: &str) -> Result<Option<Credential>> {
        if secret.is_empty() {
            return Ok(None);
        }
        Ok(self.db.credential_find_active(&hash_secret(secret)).await?)
    }
}
