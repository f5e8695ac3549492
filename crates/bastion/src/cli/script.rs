//! Script command - manage the script catalog

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use bastion_core::catalog::resolve_script_path;
use bastion_core::Permission;
use bastion_db::Script;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum ScriptAction {
    /// Add or replace a catalogued script (admin only)
    Add {
        /// Catalog id workflows refer to
        id: String,
        /// Executable path, absolute or relative to the working directory
        file: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Allowed target tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Distinct approvals required by default
        #[arg(long, default_value = "1")]
        approvals: u32,
    },
    /// Show one script
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List catalogued scripts
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(ctx: &AppContext, action: ScriptAction) -> anyhow::Result<()> {
    let catalog = &ctx.controller.catalog;
    let working_dir = ctx.config.working_dir();

    match action {
        ScriptAction::Add {
            id,
            file,
            description,
            tags,
            approvals,
        } => {
            ctx.authenticate(Permission::ManageScripts).await?;
            let script = catalog
                .add(Script {
                    id,
                    file,
                    description,
                    allowed_tags: tags.into_iter().collect(),
                    required_approval_levels: approvals,
                })
                .await
                .map_err(HelpfulError::from)?;

            let path = resolve_script_path(&working_dir, &script.file);
            println!(
                "Script '{}' catalogued ({} approval{} required).",
                script.id,
                script.required_approval_levels,
                if script.required_approval_levels == 1 { "" } else { "s" }
            );
            if !path.exists() {
                println!("WARNING: {} does not exist yet; execution will fail until it does.", path.display());
            }
        }
        ScriptAction::Show { id, json } => {
            ctx.authenticate(Permission::ReadCatalog).await?;
            let script = catalog.get(&id).await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&script);
            }
            let path = resolve_script_path(&working_dir, &script.file);
            print_table(
                &["Field", "Value"],
                vec![
                    vec!["id".into(), script.id.clone()],
                    vec!["file".into(), script.file.clone()],
                    vec!["resolved path".into(), path.display().to_string()],
                    vec!["description".into(), script.description.clone()],
                    vec!["tags".into(), join_tags(&script)],
                    vec!["approvals".into(), script.required_approval_levels.to_string()],
                ],
            );
        }
        ScriptAction::List { json } => {
            ctx.authenticate(Permission::ReadCatalog).await?;
            let scripts = catalog.list().await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&scripts);
            }
            if scripts.is_empty() {
                println!("No scripts catalogued. Add one with `bastion script add <id> <file>`.");
                return Ok(());
            }
            let rows = scripts
                .iter()
                .map(|s| {
                    vec![
                        s.id.clone(),
                        s.file.clone(),
                        s.required_approval_levels.to_string(),
                        join_tags(s),
                        s.description.clone(),
                    ]
                })
                .collect();
            print_table(&["Id", "File", "Approvals", "Tags", "Description"], rows);
        }
    }
    Ok(())
}

fn join_tags(script: &Script) -> String {
    if script.allowed_tags.is_empty() {
        "-".to_string()
    } else {
        script.allowed_tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
