//! Error taxonomy for core operations.
//!
//! Every variant is recoverable; callers map them to a response with
//! [`CoreError::status_code`].

use bastion_db::{DbError, Role};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing, unknown or revoked credential.
    #[error("Authentication failed: invalid or revoked credential")]
    AuthenticationFailure,

    /// Valid credential whose role does not permit the operation.
    #[error("Role '{role}' may not {action}")]
    AuthorizationFailure { role: Role, action: &'static str },

    /// Agent self-registration with a missing or wrong shared secret.
    #[error("Agent registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The workflow passed its deadline; it has been moved to `expired`.
    #[error("Workflow {0} has expired")]
    Expired(String),

    /// A new workflow referenced a script the catalog does not hold.
    #[error("Unknown script: {0}")]
    UnknownScript(String),

    /// An approved workflow's script disappeared before execution.
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(DbError),
}

impl CoreError {
    /// HTTP-style status code for boundary layers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::ScriptNotFound(_) => 404,
            Self::InvalidState(_)
            | Self::Expired(_)
            | Self::UnknownScript(_)
            | Self::InvalidRequest(_) => 400,
            Self::AuthenticationFailure | Self::AuthorizationFailure { .. } => 401,
            Self::RegistrationRejected(_) => 403,
            Self::Storage(_) => 500,
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

impl From<DbError> for CoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => Self::NotFound(msg),
            DbError::InvalidState(msg) => Self::InvalidState(msg),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(CoreError::NotFound("wf".into()).status_code(), 404);
        assert_eq!(CoreError::InvalidState("x".into()).status_code(), 400);
        assert_eq!(CoreError::Expired("wf".into()).status_code(), 400);
        assert_eq!(CoreError::UnknownScript("s".into()).status_code(), 400);
        assert_eq!(CoreError::AuthenticationFailure.status_code(), 401);
        assert_eq!(
            CoreError::AuthorizationFailure {
                role: Role::Viewer,
                action: "execute workflows"
            }
            .status_code(),
            401
        );
        assert_eq!(CoreError::RegistrationRejected("x".into()).status_code(), 403);
    }

    #[test]
    fn test_db_errors_keep_their_meaning() {
        let err: CoreError = DbError::invalid_state("Workflow w is denied").into();
        assert!(matches!(err, CoreError::InvalidState(_)));
        assert_eq!(err.to_string(), "Invalid state: Workflow w is denied");

        let err: CoreError = DbError::corrupt("bad row").into();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_authorization_message() {
        let err = CoreError::AuthorizationFailure {
            role: Role::Viewer,
            action: "execute workflows",
        };
        assert_eq!(err.to_string(), "Role 'viewer' may not execute workflows");
    }
}
