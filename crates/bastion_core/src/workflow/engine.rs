use super::locks::KeyedLocks;
use super::{ApprovalReceipt, CreateWorkflow, ExecutionReport};
use crate::auth::Principal;
use crate::cancel::CancellationToken;
use crate::catalog::{resolve_script_path, ScriptCatalog};
use crate::clock::Clock;
use crate::error::{CoreError, Result};
use crate::executor::{ExecutionOutcome, ScriptRunner};
use bastion_db::{AuditAction, AuditEntry, AuditRecord, BastionDb, Workflow, WorkflowStatus};
use bastion_ids::{ExecutionId, WorkflowId};
use bastion_protocol::defaults::TTL_EXPIRED_NOTE;
use bastion_protocol::BastionConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// Engine knobs taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Base for relative script paths.
    pub working_dir: PathBuf,
    /// TTL applied when a request names none, in TTL units.
    pub default_ttl: u32,
    pub ttl_unit: Duration,
    pub list_limit: u32,
}

impl EngineSettings {
    pub fn from_config(config: &BastionConfig) -> Self {
        Self {
            working_dir: config.working_dir(),
            default_ttl: config.workflows.default_ttl,
            ttl_unit: config.ttl_unit(),
            list_limit: config.workflows.list_limit,
        }
    }
}

type RunningMap = Arc<Mutex<HashMap<WorkflowId, CancellationToken>>>;

/// Owns every workflow mutation.
///
/// Operations on one workflow are serialized by a per-id async lock held
/// for the whole call, including the child process of an execute.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    db: BastionDb,
    catalog: ScriptCatalog,
    runner: ScriptRunner,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    locks: Arc<KeyedLocks>,
    running: RunningMap,
}

impl WorkflowEngine {
    pub fn new(
        db: BastionDb,
        catalog: ScriptCatalog,
        runner: ScriptRunner,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            db,
            catalog,
            runner,
            clock,
            settings,
            locks: Arc::new(KeyedLocks::new()),
            running: Arc::default(),
        }
    }

    /// Open a new workflow in `pending`, requested by `principal`.
    pub async fn create(&self, principal: &Principal, request: CreateWorkflow) -> Result<Workflow> {
        let script_id = request.script_id.trim();
        let script = self
            .catalog
            .find(script_id)
            .await?
            .ok_or_else(|| CoreError::UnknownScript(script_id.to_string()))?;

        let required = request
            .required_approval_levels
            .unwrap_or(script.required_approval_levels);
        if required < 1 {
            return Err(CoreError::invalid_request(
                "required approval levels must be at least 1",
            ));
        }

        let ttl_units = request.ttl.unwrap_or(self.settings.default_ttl);
        if ttl_units < 1 {
            return Err(CoreError::invalid_request("ttl must be at least 1"));
        }
        let ttl = self
            .settings
            .ttl_unit
            .checked_mul(ttl_units)
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .ok_or_else(|| CoreError::invalid_request(format!("ttl {} is too large", ttl_units)))?;

        let now = self.clock.now();
        let workflow = Workflow {
            id: WorkflowId::new(),
            script_id: script.id,
            targets: request.targets,
            requestor: principal.name.clone(),
            status: WorkflowStatus::Pending,
            required_approval_levels: required,
            approvals: Vec::new(),
            notify_email: request
                .notify_email
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            reason: request.reason,
            created_at: now,
            expires_at: now + ttl,
            last_update: now,
        };

        let audit = AuditRecord::new(AuditAction::Created, &principal.name, &workflow.reason);
        self.db.workflow_insert(&workflow, &audit).await?;

        info!(
            workflow = %workflow.id,
            script = %workflow.script_id,
            requestor = %workflow.requestor,
            required,
            targets = workflow.targets.len(),
            "Workflow created"
        );
        Ok(workflow)
    }

    /// Record `principal`'s approval. Promotes to `approved` when the
    /// distinct-approver count reaches the workflow's required level.
    pub async fn approve(
        &self,
        id: &WorkflowId,
        principal: &Principal,
        note: &str,
    ) -> Result<ApprovalReceipt> {
        let _guard = self.locks.lock(id.as_str()).await;
        let workflow = self.load(id).await?;
        ensure_open(&workflow, "approved")?;

        let audit = AuditRecord::new(AuditAction::Approved, &principal.name, note);
        let tally = self
            .db
            .workflow_record_approval(id, &principal.name, &audit, self.clock.now())
            .await?;

        if tally.newly_recorded {
            info!(
                workflow = %id,
                approver = %principal.name,
                count = tally.count,
                required = tally.required,
                status = %tally.status,
                "Approval recorded"
            );
        } else {
            info!(workflow = %id, approver = %principal.name, "Repeat approval ignored");
        }

        Ok(ApprovalReceipt {
            workflow_id: id.clone(),
            approvals: tally.count,
            required: tally.required,
            status: tally.status,
            duplicate: !tally.newly_recorded,
        })
    }

    /// Deny the workflow. One denial overrides any number of approvals.
    pub async fn deny(&self, id: &WorkflowId, principal: &Principal, note: &str) -> Result<Workflow> {
        let _guard = self.locks.lock(id.as_str()).await;
        let workflow = self.load(id).await?;
        ensure_open(&workflow, "denied")?;

        let audit = AuditRecord::new(AuditAction::Denied, &principal.name, note);
        self.db
            .workflow_transition(
                id,
                &WorkflowStatus::OPEN,
                WorkflowStatus::Denied,
                &audit,
                self.clock.now(),
            )
            .await?;

        info!(workflow = %id, actor = %principal.name, "Workflow denied");
        self.load(id).await
    }

    /// Run an approved workflow's script and record the outcome.
    ///
    /// A workflow past its deadline is moved to `expired` instead and the
    /// call fails with [`CoreError::Expired`]; no process is started.
    ///
    /// The run is claimed in storage before the script starts, so at most one
    /// caller across all processes launches it. A losing caller gets
    /// [`CoreError::InvalidState`].
    pub async fn execute(&self, id: &WorkflowId, principal: &Principal) -> Result<ExecutionReport> {
        let _guard = self.locks.lock(id.as_str()).await;
        let workflow = self.load(id).await?;

        if workflow.status != WorkflowStatus::Approved {
            return Err(CoreError::InvalidState(format!(
                "Workflow {} is {}; only approved workflows can be executed",
                id, workflow.status
            )));
        }

        let now = self.clock.now();
        if workflow.is_expired_at(now) {
            let audit = AuditRecord::new(AuditAction::Expired, &principal.name, TTL_EXPIRED_NOTE);
            self.db
                .workflow_transition(
                    id,
                    &[WorkflowStatus::Approved],
                    WorkflowStatus::Expired,
                    &audit,
                    now,
                )
                .await?;
            warn!(workflow = %id, expired_at = %workflow.expires_at, "Execution refused: workflow expired");
            return Err(CoreError::Expired(id.to_string()));
        }

        let script = self
            .catalog
            .find(&workflow.script_id)
            .await?
            .ok_or_else(|| CoreError::ScriptNotFound(workflow.script_id.clone()))?;
        let path = resolve_script_path(&self.settings.working_dir, &script.file);

        let execution_id = ExecutionId::new();
        // Another handle on the store may race us here; only the claim holder runs.
        self.db
            .workflow_claim_execution(id, &execution_id, now)
            .await?;
        info!(
            workflow = %id,
            execution = %execution_id,
            actor = %principal.name,
            path = %path.display(),
            "Executing workflow"
        );

        let output = {
            let running = RunningGuard::register(&self.running, id);
            self.runner.run(&path, running.token()).await
        };

        let status = output.workflow_status();
        let note = execution_note(output.outcome, output.exit_code);
        let audit = AuditRecord::new(AuditAction::Executed, &principal.name, &note);
        self.db
            .workflow_finish_execution(id, &execution_id, status, &audit, self.clock.now())
            .await?;

        info!(
            workflow = %id,
            execution = %execution_id,
            status = %status,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Workflow executed"
        );

        Ok(ExecutionReport {
            workflow_id: id.clone(),
            execution_id,
            status,
            outcome: output.outcome,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            targets: workflow.targets,
        })
    }

    /// Signal an in-flight execution of `id` to stop. Returns false when
    /// nothing is running for it in this process.
    pub fn cancel(&self, id: &WorkflowId) -> bool {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.get(id) {
            Some(token) => {
                token.cancel();
                info!(workflow = %id, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Move every open workflow past its deadline to `expired`.
    ///
    /// Returns the ids that were transitioned.
    pub async fn expire_overdue(&self, principal: &Principal) -> Result<Vec<WorkflowId>> {
        let candidates = self.db.workflow_list_overdue(self.clock.now()).await?;
        let mut expired = Vec::with_capacity(candidates.len());

        for id in candidates {
            let _guard = self.locks.lock(id.as_str()).await;
            let now = self.clock.now();
            let Some(workflow) = self.db.workflow_get(&id).await? else {
                continue;
            };
            if workflow.status.is_terminal() || !workflow.is_expired_at(now) {
                continue;
            }

            let audit = AuditRecord::new(AuditAction::Expired, &principal.name, TTL_EXPIRED_NOTE);
            match self
                .db
                .workflow_transition(&id, &WorkflowStatus::OPEN, WorkflowStatus::Expired, &audit, now)
                .await
            {
                Ok(()) => {
                    info!(workflow = %id, "Workflow expired by sweep");
                    expired.push(id);
                }
                // Another process closed it between the read and the write.
                Err(bastion_db::DbError::InvalidState(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(expired)
    }

    pub async fn get(&self, id: &WorkflowId) -> Result<Workflow> {
        self.load(id).await
    }

    /// Most recently created first, truncated to `limit`. `None` uses the
    /// configured limit; `Some(0)` yields nothing.
    pub async fn list(&self, limit: Option<u32>) -> Result<Vec<Workflow>> {
        let limit = limit.unwrap_or(self.settings.list_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        Ok(self.db.workflow_list(limit).await?)
    }

    /// Audit trail, most recent first.
    pub async fn audit(&self, id: &WorkflowId) -> Result<Vec<AuditEntry>> {
        // Distinguish "unknown workflow" from "no entries".
        self.load(id).await?;
        Ok(self.db.workflow_audit(id).await?)
    }

    async fn load(&self, id: &WorkflowId) -> Result<Workflow> {
        self.db
            .workflow_get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Workflow {}", id)))
    }
}

fn ensure_open(workflow: &Workflow, attempted: &str) -> Result<()> {
    if workflow.status.is_terminal() {
        return Err(CoreError::InvalidState(format!(
            "Workflow {} is {}; it cannot be {}",
            workflow.id, workflow.status, attempted
        )));
    }
    Ok(())
}

fn execution_note(outcome: ExecutionOutcome, exit_code: i32) -> String {
    match outcome {
        ExecutionOutcome::Exited { .. } => format!("rc={}", exit_code),
        ExecutionOutcome::LaunchFailed => format!("rc={} (launch failed)", exit_code),
        ExecutionOutcome::TimedOut => format!("rc={} (timed out)", exit_code),
        ExecutionOutcome::Cancelled => format!("rc={} (cancelled)", exit_code),
    }
}

/// Keeps an execution's cancellation token reachable by [`WorkflowEngine::cancel`]
/// until the run finishes.
struct RunningGuard<'a> {
    map: &'a Mutex<HashMap<WorkflowId, CancellationToken>>,
    id: WorkflowId,
    token: CancellationToken,
}

impl<'a> RunningGuard<'a> {
    fn register(map: &'a Mutex<HashMap<WorkflowId, CancellationToken>>, id: &WorkflowId) -> Self {
        let token = CancellationToken::new();
        map.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), token.clone());
        Self {
            map,
            id: id.clone(),
            token,
        }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_notes_carry_exit_code() {
        assert_eq!(execution_note(ExecutionOutcome::Exited { code: 0 }, 0), "rc=0");
        assert_eq!(execution_note(ExecutionOutcome::Exited { code: 2 }, 2), "rc=2");
        assert_eq!(execution_note(ExecutionOutcome::TimedOut, -1), "rc=-1 (timed out)");
        assert_eq!(
            execution_note(ExecutionOutcome::LaunchFailed, -1),
            "rc=-1 (launch failed)"
        );
    }

    #[test]
    fn settings_follow_config() {
        let mut config = BastionConfig::default();
        config.workflows.working_dir = Some(PathBuf::from("/srv/scripts"));
        config.workflows.ttl_unit_secs = 1;
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.working_dir, PathBuf::from("/srv/scripts"));
        assert_eq!(settings.ttl_unit, Duration::from_secs(1));
        assert_eq!(settings.default_ttl, 60);
    }
}
