//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use bastion_core::CoreError;
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// No `--token` and no `BASTION_TOKEN`
    pub fn missing_token() -> Self {
        Self::new("No credential supplied")
            .with_context("This command acts on behalf of a credential holder")
            .with_suggestions([
                "TRY: Pass --token <SECRET>".to_string(),
                "TRY: export BASTION_TOKEN=<SECRET>".to_string(),
                "TRY: bastion init   # Prints the first admin secret on a fresh store".to_string(),
            ])
    }

    /// No `--reg-secret` and no `BASTION_REG_SECRET`
    pub fn missing_registration_secret() -> Self {
        Self::new("No registration secret supplied")
            .with_context("Agents authenticate with the shared registration secret, not a token")
            .with_suggestions([
                "TRY: Pass --reg-secret <SECRET>".to_string(),
                "TRY: export BASTION_REG_SECRET=<SECRET>".to_string(),
            ])
    }

    /// Database could not be opened
    pub fn database_unavailable(path: &Path, reason: &str) -> Self {
        Self::new(format!("Cannot open database: {}", path.display()))
            .with_context(reason.to_string())
            .with_suggestions([
                format!("TRY: Check permissions: ls -la {}", path.display()),
                "TRY: Point at another file with --database or BASTION_DB".to_string(),
            ])
    }

    /// Translate a core failure into something an operator can act on.
    pub fn from_core(err: &CoreError) -> Self {
        let base = Self::new(err.to_string());
        match err {
            CoreError::AuthenticationFailure => base
                .with_context("The credential is unknown or has been revoked")
                .with_suggestion("TRY: Ask an admin to issue a new one: bastion token create <name> --role <role>"),
            CoreError::AuthorizationFailure { .. } => base
                .with_context("The credential is valid but its role does not permit this command")
                .with_suggestion("TRY: bastion token list   # Check which role each credential holds"),
            CoreError::RegistrationRejected(_) => base.with_suggestions([
                "TRY: Check the secret matches [agents] registration_secret on the server".to_string(),
                "TRY: Set BASTION_AGENT_REG_SECRET where the store is managed".to_string(),
            ]),
            CoreError::NotFound(_) => base.with_suggestions([
                "TRY: bastion workflow list".to_string(),
                "TRY: bastion script list".to_string(),
            ]),
            CoreError::InvalidState(_) => base
                .with_suggestion("TRY: bastion workflow show <id>   # Inspect the current status"),
            CoreError::Expired(_) => base
                .with_context("The TTL elapsed before execution; the workflow is now expired")
                .with_suggestion("TRY: Create a new workflow and collect approvals again"),
            CoreError::UnknownScript(_) => base
                .with_suggestion("TRY: bastion script list   # See catalogued script ids"),
            CoreError::ScriptNotFound(_) => base
                .with_context("The script was removed from the catalog after the workflow was approved")
                .with_suggestion("TRY: bastion script add <id> <file>   # Re-catalogue it"),
            CoreError::InvalidRequest(_) => base,
            CoreError::Storage(_) => base
                .with_context("The database rejected the operation")
                .with_suggestion("TRY: Re-run with -v and check ~/.bastion/logs"),
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

impl From<CoreError> for HelpfulError {
    fn from(err: CoreError) -> Self {
        Self::from_core(&err)
    }
}

/// Emit an error as a single JSON object on stderr.
pub fn print_json_error(err: &anyhow::Error) {
    let value = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({ "error": format!("{:#}", err) }),
    };
    eprintln!("{}", value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_db::Role;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While processing data")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While processing data"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_core_errors_keep_reason() {
        let err = HelpfulError::from(CoreError::AuthorizationFailure {
            role: Role::Viewer,
            action: "execute workflows",
        });
        let display = format!("{}", err);
        assert!(display.contains("Role 'viewer' may not execute workflows"));
        assert!(display.contains("TRY:"));

        let err = HelpfulError::from(CoreError::Expired("wf-1".into()));
        assert!(err.context.as_deref().unwrap_or_default().contains("expired"));
    }

    #[test]
    fn test_missing_token_suggests_env() {
        let display = format!("{}", HelpfulError::missing_token());
        assert!(display.contains("BASTION_TOKEN"));
    }
}
