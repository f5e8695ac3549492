//! Token command - manage bearer credentials (admin only)

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_absolute, print_json, print_table_colored};
use bastion_core::Permission;
use bastion_db::Role;
use clap::Subcommand;
use comfy_table::Color;

#[derive(Subcommand, Debug, Clone)]
pub enum TokenAction {
    /// Issue a credential with a generated secret (printed once)
    Create {
        /// Credential name, recorded as the actor in audit trails
        name: String,
        /// admin, approver, requestor or viewer
        #[arg(long, value_parser = parse_role)]
        role: Role,
        #[arg(long, default_value = "")]
        description: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Revoke a credential by name
    Revoke { name: String },
    /// List credentials (secrets are never shown)
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| {
        format!(
            "unknown role '{}' (expected one of: {})",
            s,
            Role::ALL.map(|r| r.as_str()).join(", ")
        )
    })
}

pub async fn run(ctx: &AppContext, action: TokenAction) -> anyhow::Result<()> {
    ctx.authenticate(Permission::ManageCredentials).await?;
    let tokens = &ctx.controller.tokens;

    match action {
        TokenAction::Create {
            name,
            role,
            description,
            json,
        } => {
            let secret = tokens
                .issue_credential(&name, role, &description)
                .await
                .map_err(HelpfulError::from)?;
            if json {
                print_json(&serde_json::json!({ "name": name, "role": role, "secret": secret }))?;
            } else {
                println!("Credential '{}' ({}) created. Secret (shown once):", name, role);
                println!();
                println!("  {}", secret);
            }
        }
        TokenAction::Revoke { name } => {
            tokens.revoke(&name).await.map_err(HelpfulError::from)?;
            println!("Credential '{}' revoked.", name);
        }
        TokenAction::List { json } => {
            let creds = tokens.list().await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&creds);
            }
            if creds.is_empty() {
                println!("No credentials. Run `bastion init` to create the first admin.");
                return Ok(());
            }
            let rows = creds
                .into_iter()
                .map(|c| {
                    let state = if c.revoked {
                        ("revoked".to_string(), Some(Color::Red))
                    } else {
                        ("active".to_string(), Some(Color::Green))
                    };
                    vec![
                        (c.name, None),
                        (c.role.to_string(), None),
                        state,
                        (format_absolute(c.created_at), None),
                        (c.description, None),
                    ]
                })
                .collect();
            print_table_colored(&["Name", "Role", "State", "Created", "Description"], rows);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("Approver"), Ok(Role::Approver));
        let err = parse_role("root").unwrap_err();
        assert!(err.contains("admin, approver, requestor, viewer"));
    }
}
