//! Workflow command - request, decide, execute and inspect approval workflows

use crate::cli::context::AppContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{
    format_absolute, format_relative, print_json, print_table, print_table_colored, status_color,
};
use bastion_core::{CreateWorkflow, ExecutionOutcome, ExecutionReport, Permission};
use bastion_db::Workflow;
use bastion_ids::WorkflowId;
use chrono::Utc;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum WorkflowAction {
    /// Request approval to run a catalogued script
    Create {
        /// Script id from the catalog
        script: String,
        /// Target agent (repeatable, order is kept)
        #[arg(long = "target", required = true)]
        targets: Vec<String>,
        #[arg(long)]
        reason: String,
        /// Override the script's required approvals
        #[arg(long)]
        approvals: Option<u32>,
        /// Lifetime in TTL units (minutes by default)
        #[arg(long)]
        ttl: Option<u32>,
        #[arg(long)]
        notify_email: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List workflows, newest first
    List {
        #[arg(long)]
        limit: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one workflow with its approvals
    Show {
        id: WorkflowId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Approve as the calling credential
    Approve {
        id: WorkflowId,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Deny as the calling credential
    Deny {
        id: WorkflowId,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Run an approved workflow's script (admin only)
    Execute {
        id: WorkflowId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the audit trail, newest first
    Audit {
        id: WorkflowId,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Expire every open workflow past its deadline (admin only)
    Sweep,
}

pub async fn run(ctx: &AppContext, action: WorkflowAction) -> anyhow::Result<()> {
    let engine = &ctx.controller.workflows;

    match action {
        WorkflowAction::Create {
            script,
            targets,
            reason,
            approvals,
            ttl,
            notify_email,
            json,
        } => {
            let principal = ctx.authenticate(Permission::CreateWorkflow).await?;
            let request = CreateWorkflow {
                script_id: script,
                targets,
                required_approval_levels: approvals,
                notify_email,
                ttl,
                reason,
            };
            let wf = engine
                .create(&principal, request)
                .await
                .map_err(HelpfulError::from)?;
            if json {
                return print_json(&wf);
            }
            println!("Workflow {} created ({}).", wf.id, wf.status);
            println!(
                "Needs {} approval{}; expires {}.",
                wf.required_approval_levels,
                if wf.required_approval_levels == 1 { "" } else { "s" },
                format_absolute(wf.expires_at)
            );
        }
        WorkflowAction::List { limit, json } => {
            ctx.authenticate(Permission::ReadWorkflows).await?;
            let workflows = engine.list(limit).await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&workflows);
            }
            if workflows.is_empty() {
                println!("No workflows.");
                return Ok(());
            }
            print_workflows_table(&workflows);
        }
        WorkflowAction::Show { id, json } => {
            ctx.authenticate(Permission::ReadWorkflows).await?;
            let wf = engine.get(&id).await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&wf);
            }
            print_workflow_detail(&wf);
        }
        WorkflowAction::Approve { id, note } => {
            let principal = ctx.authenticate(Permission::DecideWorkflow).await?;
            let receipt = engine
                .approve(&id, &principal, &note)
                .await
                .map_err(HelpfulError::from)?;
            if receipt.duplicate {
                println!("'{}' had already approved {}.", principal.name, id);
            }
            println!(
                "Workflow {}: {}/{} approvals, {}.",
                id, receipt.approvals, receipt.required, receipt.status
            );
        }
        WorkflowAction::Deny { id, note } => {
            let principal = ctx.authenticate(Permission::DecideWorkflow).await?;
            let wf = engine
                .deny(&id, &principal, &note)
                .await
                .map_err(HelpfulError::from)?;
            println!("Workflow {} {}.", wf.id, wf.status);
        }
        WorkflowAction::Execute { id, json } => {
            let principal = ctx.authenticate(Permission::ExecuteWorkflow).await?;
            let report = engine
                .execute(&id, &principal)
                .await
                .map_err(HelpfulError::from)?;
            if json {
                return print_json(&report);
            }
            print_execution_report(&report);
        }
        WorkflowAction::Audit { id, json } => {
            ctx.authenticate(Permission::ReadWorkflows).await?;
            let trail = engine.audit(&id).await.map_err(HelpfulError::from)?;
            if json {
                return print_json(&trail);
            }
            let rows = trail
                .into_iter()
                .map(|e| {
                    vec![
                        format_absolute(e.timestamp),
                        e.action.to_string(),
                        e.actor,
                        e.note,
                    ]
                })
                .collect();
            print_table(&["Time", "Action", "Actor", "Note"], rows);
        }
        WorkflowAction::Sweep => {
            let principal = ctx.authenticate(Permission::SweepWorkflows).await?;
            let expired = engine
                .expire_overdue(&principal)
                .await
                .map_err(HelpfulError::from)?;
            if expired.is_empty() {
                println!("No overdue workflows.");
            } else {
                for id in &expired {
                    println!("expired {}", id);
                }
                println!("{} workflow(s) expired.", expired.len());
            }
        }
    }
    Ok(())
}

fn print_workflows_table(workflows: &[Workflow]) {
    let now = Utc::now();
    let rows = workflows
        .iter()
        .map(|wf| {
            vec![
                (wf.id.to_string(), None),
                (wf.script_id.clone(), None),
                (wf.status.to_string(), Some(status_color(wf.status))),
                (
                    format!("{}/{}", wf.approval_count(), wf.required_approval_levels),
                    None,
                ),
                (wf.requestor.clone(), None),
                (format_relative(wf.created_at, now), None),
                (expiry_label(wf, now), None),
            ]
        })
        .collect();
    print_table_colored(
        &["Id", "Script", "Status", "Approvals", "Requestor", "Created", "Expires"],
        rows,
    );
}

fn expiry_label(wf: &Workflow, now: chrono::DateTime<Utc>) -> String {
    if wf.status.is_terminal() {
        "-".to_string()
    } else if wf.is_expired_at(now) {
        "overdue".to_string()
    } else {
        format_relative(wf.expires_at, now)
    }
}

fn print_workflow_detail(wf: &Workflow) {
    let now = Utc::now();
    print_table(
        &["Field", "Value"],
        vec![
            vec!["id".into(), wf.id.to_string()],
            vec!["script".into(), wf.script_id.clone()],
            vec!["status".into(), wf.status.to_string()],
            vec!["requestor".into(), wf.requestor.clone()],
            vec!["targets".into(), wf.targets.join(", ")],
            vec!["reason".into(), wf.reason.clone()],
            vec![
                "approvals".into(),
                format!("{}/{}", wf.approval_count(), wf.required_approval_levels),
            ],
            vec![
                "notify email".into(),
                wf.notify_email.clone().unwrap_or_else(|| "-".into()),
            ],
            vec!["created".into(), format_absolute(wf.created_at)],
            vec![
                "expires".into(),
                format!("{} ({})", format_absolute(wf.expires_at), expiry_label(wf, now)),
            ],
            vec!["last update".into(), format_absolute(wf.last_update)],
        ],
    );

    if !wf.approvals.is_empty() {
        let rows = wf
            .approvals
            .iter()
            .map(|a| {
                vec![
                    a.level.to_string(),
                    a.approver.clone(),
                    format_absolute(a.approved_at),
                ]
            })
            .collect();
        print_table(&["Level", "Approver", "Approved"], rows);
    }
}

fn print_execution_report(report: &ExecutionReport) {
    let detail = match report.outcome {
        ExecutionOutcome::Exited { .. } => String::new(),
        ExecutionOutcome::LaunchFailed => " (launch failed)".into(),
        ExecutionOutcome::TimedOut => " (timed out)".into(),
        ExecutionOutcome::Cancelled => " (cancelled)".into(),
    };
    println!(
        "Workflow {}: {}{}, rc={}",
        report.workflow_id, report.status, detail, report.exit_code
    );
    println!("Targets: {}", report.targets.join(", "));
    if !report.stdout.is_empty() {
        println!("--- stdout ---");
        print!("{}", report.stdout);
        if !report.stdout.ends_with('\n') {
            println!();
        }
    }
    if !report.stderr.is_empty() {
        eprintln!("--- stderr ---");
        eprint!("{}", report.stderr);
        if !report.stderr.ends_with('\n') {
            eprintln!();
        }
    }
}
