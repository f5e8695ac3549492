//! End-to-end workflow lifecycle through the controller.
#![cfg(unix)]

use bastion_core::{
    Controller, CoreError, CreateWorkflow, ExecutionOutcome, ManualClock, Permission, Principal,
};
use bastion_db::{AuditAction, BastionDb, Role, Script, WorkflowStatus};
use bastion_ids::WorkflowId;
use bastion_protocol::BastionConfig;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 2, 9, 30, 0).unwrap()
}

struct Fixture {
    ctl: Controller,
    clock: Arc<ManualClock>,
    db: BastionDb,
    config: BastionConfig,
    dir: TempDir,
}

async fn fixture_with(configure: impl FnOnce(&mut BastionConfig)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let db = BastionDb::open(dir.path().join("bastion.sqlite")).await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));

    let mut config = BastionConfig::default();
    config.workflows.working_dir = Some(dir.path().to_path_buf());
    configure(&mut config);

    let ctl = Controller::new(db.clone(), &config, clock.clone());
    Fixture {
        ctl,
        clock,
        db,
        config,
        dir,
    }
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

fn person(name: &str, role: Role) -> Principal {
    Principal {
        name: name.to_string(),
        role,
    }
}

fn write_script(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

impl Fixture {
    async fn catalog(&self, id: &str, body: &str, levels: u32) {
        let file = format!("{}.sh", id);
        write_script(self.dir.path(), &file, body);
        self.ctl
            .catalog
            .add(Script {
                id: id.to_string(),
                file,
                description: String::new(),
                allowed_tags: Default::default(),
                required_approval_levels: levels,
            })
            .await
            .unwrap();
    }

    async fn create(&self, script_id: &str, ttl: Option<u32>) -> WorkflowId {
        let request = CreateWorkflow {
            script_id: script_id.to_string(),
            targets: vec!["web-3".into(), "web-1".into()],
            ttl,
            reason: "apply patch".into(),
            ..Default::default()
        };
        self.ctl
            .workflows
            .create(&person("rita", Role::Requestor), request)
            .await
            .unwrap()
            .id
    }

    async fn approve(&self, id: &WorkflowId, approver: &str) -> bastion_core::ApprovalReceipt {
        self.ctl
            .workflows
            .approve(id, &person(approver, Role::Approver), "")
            .await
            .unwrap()
    }

    /// A controller on its own connection pool over the same database file,
    /// standing in for a second `bastion` process.
    async fn second_process(&self) -> Controller {
        let db = BastionDb::open(self.dir.path().join("bastion.sqlite")).await.unwrap();
        Controller::new(db, &self.config, self.clock.clone())
    }

    fn runs_marker(&self) -> std::path::PathBuf {
        self.dir.path().join("runs.log")
    }

    fn recorded_runs(&self) -> usize {
        std::fs::read_to_string(self.runs_marker())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    async fn status(&self, id: &WorkflowId) -> WorkflowStatus {
        self.ctl.workflows.get(id).await.unwrap().status
    }
}

fn admin() -> Principal {
    person("root", Role::Admin)
}

#[tokio::test]
async fn two_approvals_then_successful_execution() {
    let fx = fixture().await;
    fx.catalog("patch", "echo patched\nexit 0", 2).await;
    let id = fx.create("patch", Some(60)).await;

    let wf = fx.ctl.workflows.get(&id).await.unwrap();
    assert_eq!(wf.status, WorkflowStatus::Pending);
    assert_eq!(wf.expires_at, t0() + Duration::minutes(60));
    assert_eq!(wf.targets, ["web-3", "web-1"]);

    let first = fx.approve(&id, "xavier").await;
    assert_eq!((first.approvals, first.status), (1, WorkflowStatus::Pending));

    let second = fx.approve(&id, "yara").await;
    assert_eq!((second.approvals, second.status), (2, WorkflowStatus::Approved));

    fx.clock.advance(Duration::minutes(10));
    let report = fx.ctl.workflows.execute(&id, &admin()).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Success);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.stdout, "patched\n");
    assert_eq!(report.targets, ["web-3", "web-1"]);
    assert_eq!(fx.status(&id).await, WorkflowStatus::Success);

    let trail = fx.ctl.workflows.audit(&id).await.unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        [
            AuditAction::Executed,
            AuditAction::Approved,
            AuditAction::Approved,
            AuditAction::Created,
        ]
    );
    assert_eq!(trail[0].note, "rc=0");
    assert_eq!(trail[0].actor, "root");
    assert_eq!(trail[3].actor, "rita");
}

#[tokio::test]
async fn execute_after_deadline_expires_without_launching() {
    let fx = fixture().await;
    let marker = fx.dir.path().join("ran");
    fx.catalog("touch", &format!("touch '{}'", marker.display()), 1).await;
    let id = fx.create("touch", Some(60)).await;
    fx.approve(&id, "xavier").await;

    fx.clock.advance(Duration::minutes(61));
    let err = fx.ctl.workflows.execute(&id, &admin()).await.unwrap_err();
    assert!(matches!(err, CoreError::Expired(_)), "{err}");
    assert_eq!(err.status_code(), 400);
    assert!(!marker.exists());
    assert_eq!(fx.status(&id).await, WorkflowStatus::Expired);

    let trail = fx.ctl.workflows.audit(&id).await.unwrap();
    assert_eq!(trail[0].action, AuditAction::Expired);
    assert_eq!(trail[0].note, "TTL expired");

    // Terminal from here on.
    let err = fx.ctl.workflows.execute(&id, &admin()).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)));
}

#[tokio::test]
async fn deny_is_terminal() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 2).await;
    let id = fx.create("patch", None).await;
    fx.approve(&id, "xavier").await;

    let denied = fx
        .ctl
        .workflows
        .deny(&id, &person("yara", Role::Approver), "not during freeze")
        .await
        .unwrap();
    assert_eq!(denied.status, WorkflowStatus::Denied);

    let approver = person("zed", Role::Approver);
    for result in [
        fx.ctl.workflows.approve(&id, &approver, "").await.map(|_| ()),
        fx.ctl.workflows.deny(&id, &approver, "").await.map(|_| ()),
        fx.ctl.workflows.execute(&id, &admin()).await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(CoreError::InvalidState(_))));
    }
    assert_eq!(fx.status(&id).await, WorkflowStatus::Denied);

    let trail = fx.ctl.workflows.audit(&id).await.unwrap();
    assert_eq!(trail[0].action, AuditAction::Denied);
    assert_eq!(trail[0].note, "not during freeze");
}

#[tokio::test]
async fn repeat_approval_does_not_count_twice() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 2).await;
    let id = fx.create("patch", None).await;

    fx.approve(&id, "xavier").await;
    let again = fx.approve(&id, "xavier").await;
    assert!(again.duplicate);
    assert_eq!((again.approvals, again.status), (1, WorkflowStatus::Pending));

    // The repeat is still visible in the trail.
    let approvals = fx
        .ctl
        .workflows
        .audit(&id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == AuditAction::Approved)
        .count();
    assert_eq!(approvals, 2);
}

#[tokio::test]
async fn approving_an_approved_workflow_keeps_it_approved() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;
    let id = fx.create("patch", None).await;

    assert_eq!(fx.approve(&id, "xavier").await.status, WorkflowStatus::Approved);
    let extra = fx.approve(&id, "yara").await;
    assert_eq!((extra.approvals, extra.status), (2, WorkflowStatus::Approved));
}

#[tokio::test]
async fn request_may_override_required_levels() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 3).await;

    let request = CreateWorkflow {
        script_id: "patch".into(),
        required_approval_levels: Some(1),
        notify_email: Some("  ".into()),
        ..Default::default()
    };
    let wf = fx
        .ctl
        .workflows
        .create(&person("rita", Role::Requestor), request)
        .await
        .unwrap();
    assert_eq!(wf.required_approval_levels, 1);
    assert_eq!(wf.notify_email, None);

    let receipt = fx.approve(&wf.id, "xavier").await;
    assert_eq!(receipt.status, WorkflowStatus::Approved);
}

#[tokio::test]
async fn create_rejects_unknown_script_and_zero_values() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;
    let rita = person("rita", Role::Requestor);

    let err = fx
        .ctl
        .workflows
        .create(&rita, CreateWorkflow { script_id: "nope".into(), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownScript(_)));
    assert_eq!(err.status_code(), 400);

    for request in [
        CreateWorkflow { script_id: "patch".into(), ttl: Some(0), ..Default::default() },
        CreateWorkflow {
            script_id: "patch".into(),
            required_approval_levels: Some(0),
            ..Default::default()
        },
    ] {
        let err = fx.ctl.workflows.create(&rita, request).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }
    assert!(fx.ctl.workflows.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn non_zero_exit_fails_the_workflow() {
    let fx = fixture().await;
    fx.catalog("broken", "echo nope >&2\nexit 4", 1).await;
    let id = fx.create("broken", None).await;
    fx.approve(&id, "xavier").await;

    let report = fx.ctl.workflows.execute(&id, &admin()).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.exit_code, 4);
    assert_eq!(report.stderr, "nope\n");
    assert_eq!(fx.ctl.workflows.audit(&id).await.unwrap()[0].note, "rc=4");
}

#[tokio::test]
async fn launch_failure_is_recorded_not_raised() {
    let fx = fixture().await;
    fx.catalog("gone", "exit 0", 1).await;
    std::fs::remove_file(fx.dir.path().join("gone.sh")).unwrap();
    let id = fx.create("gone", None).await;
    fx.approve(&id, "xavier").await;

    let report = fx.ctl.workflows.execute(&id, &admin()).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.outcome, ExecutionOutcome::LaunchFailed);
    assert_eq!(report.exit_code, -1);
    assert!(report.stderr.contains("gone.sh"), "{}", report.stderr);
}

#[tokio::test]
async fn script_removed_from_catalog_is_not_found() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;
    let id = fx.create("patch", None).await;
    fx.approve(&id, "xavier").await;

    sqlx::query("DELETE FROM scripts WHERE id = 'patch'")
        .execute(fx.db.pool())
        .await
        .unwrap();

    let err = fx.ctl.workflows.execute(&id, &admin()).await.unwrap_err();
    assert!(matches!(err, CoreError::ScriptNotFound(_)));
    assert_eq!(err.status_code(), 404);
    assert_eq!(fx.status(&id).await, WorkflowStatus::Approved);
}

#[tokio::test]
async fn execution_timeout_records_timed_out() {
    let fx = fixture_with(|c| c.workflows.execution_timeout_secs = 1).await;
    fx.catalog("hang", "sleep 30", 1).await;
    let id = fx.create("hang", None).await;
    fx.approve(&id, "xavier").await;

    let report = fx.ctl.workflows.execute(&id, &admin()).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::TimedOut);
    assert_eq!(report.outcome, ExecutionOutcome::TimedOut);
    assert_eq!(fx.status(&id).await, WorkflowStatus::TimedOut);
    assert_eq!(
        fx.ctl.workflows.audit(&id).await.unwrap()[0].note,
        "rc=-1 (timed out)"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_stops_an_inflight_execution() {
    let fx = fixture().await;
    fx.catalog("hang", "sleep 30", 1).await;
    let id = fx.create("hang", None).await;
    fx.approve(&id, "xavier").await;

    assert!(!fx.ctl.workflows.cancel(&id));

    let engine = fx.ctl.workflows.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.execute(&run_id, &admin()).await });

    let mut cancelled = false;
    for _ in 0..200 {
        if fx.ctl.workflows.cancel(&id) {
            cancelled = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(cancelled);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert!(!fx.ctl.workflows.cancel(&id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_promote_exactly_once() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 3).await;
    let id = fx.create("patch", None).await;

    let mut handles = Vec::new();
    for approver in ["a1", "a2", "a3", "a1", "a2", "a3"] {
        let engine = fx.ctl.workflows.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .approve(&id, &person(approver, Role::Approver), "")
                .await
                .unwrap()
        }));
    }
    let mut duplicates = 0;
    for handle in handles {
        if handle.await.unwrap().duplicate {
            duplicates += 1;
        }
    }
    assert_eq!(duplicates, 3);

    let wf = fx.ctl.workflows.get(&id).await.unwrap();
    assert_eq!(wf.status, WorkflowStatus::Approved);
    assert_eq!(wf.approval_count(), 3);
    let levels: Vec<u32> = wf.approvals.iter().map(|a| a.level).collect();
    assert_eq!(levels, [1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_processes_execute_an_approved_workflow_once() {
    let fx = fixture().await;
    let body = format!("echo run >> '{}'\nsleep 1", fx.runs_marker().display());
    fx.catalog("patch", &body, 1).await;
    let id = fx.create("patch", None).await;
    fx.approve(&id, "xavier").await;

    let other = fx.second_process().await;
    let (admin_a, admin_b) = (admin(), admin());
    let (a, b) = tokio::join!(
        fx.ctl.workflows.execute(&id, &admin_a),
        other.workflows.execute(&id, &admin_b),
    );

    let (won, lost) = match (a, b) {
        (Ok(report), Err(err)) | (Err(err), Ok(report)) => (report, err),
        outcomes => panic!("expected exactly one execution, got {:?}", outcomes),
    };
    assert_eq!(won.status, WorkflowStatus::Success);
    assert!(matches!(lost, CoreError::InvalidState(_)), "{lost}");
    assert_eq!(fx.recorded_runs(), 1);

    let trail = fx.ctl.workflows.audit(&id).await.unwrap();
    let executed: Vec<&str> = trail
        .iter()
        .filter(|e| e.action == AuditAction::Executed)
        .map(|e| e.note.as_str())
        .collect();
    assert_eq!(executed, ["rc=0"]);

    // Terminal now: a later attempt from either side starts nothing.
    assert!(matches!(
        other.workflows.execute(&id, &admin()).await,
        Err(CoreError::InvalidState(_))
    ));
    assert_eq!(fx.recorded_runs(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deny_from_another_process_waits_out_a_running_execution() {
    let fx = fixture().await;
    let body = format!("echo run >> '{}'\nsleep 1", fx.runs_marker().display());
    fx.catalog("patch", &body, 1).await;
    let id = fx.create("patch", None).await;
    fx.approve(&id, "xavier").await;

    let engine = fx.ctl.workflows.clone();
    let run_id = id.clone();
    let run = tokio::spawn(async move { engine.execute(&run_id, &admin()).await });

    for _ in 0..200 {
        if fx.recorded_runs() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(fx.recorded_runs(), 1);

    let other = fx.second_process().await;
    let err = other
        .workflows
        .deny(&id, &person("yara", Role::Approver), "too late")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState(_)), "{err}");
    assert!(err.to_string().contains("being executed"), "{err}");
    assert!(matches!(
        other
            .workflows
            .approve(&id, &person("zed", Role::Approver), "")
            .await,
        Err(CoreError::InvalidState(_))
    ));

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.status, WorkflowStatus::Success);
    assert_eq!(fx.status(&id).await, WorkflowStatus::Success);

    let trail = fx.ctl.workflows.audit(&id).await.unwrap();
    let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        [AuditAction::Executed, AuditAction::Approved, AuditAction::Created]
    );
}

#[tokio::test]
async fn sweep_expires_only_overdue_open_workflows() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;

    let short = fx.create("patch", Some(5)).await;
    let approved_short = fx.create("patch", Some(5)).await;
    fx.approve(&approved_short, "xavier").await;
    let long = fx.create("patch", Some(120)).await;
    let denied = fx.create("patch", Some(5)).await;
    fx.ctl
        .workflows
        .deny(&denied, &person("yara", Role::Approver), "")
        .await
        .unwrap();

    fx.clock.advance(Duration::minutes(6));
    let mut expired = fx.ctl.workflows.expire_overdue(&admin()).await.unwrap();
    expired.sort();
    let mut expected = vec![short.clone(), approved_short.clone()];
    expected.sort();
    assert_eq!(expired, expected);

    assert_eq!(fx.status(&short).await, WorkflowStatus::Expired);
    assert_eq!(fx.status(&approved_short).await, WorkflowStatus::Expired);
    assert_eq!(fx.status(&long).await, WorkflowStatus::Pending);
    assert_eq!(fx.status(&denied).await, WorkflowStatus::Denied);

    assert!(fx.ctl.workflows.expire_overdue(&admin()).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_is_newest_first_and_audit_needs_known_workflow() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;

    let first = fx.create("patch", None).await;
    fx.clock.advance(Duration::seconds(1));
    let second = fx.create("patch", None).await;

    let ids: Vec<WorkflowId> = fx
        .ctl
        .workflows
        .list(None)
        .await
        .unwrap()
        .into_iter()
        .map(|w| w.id)
        .collect();
    assert_eq!(ids, [second.clone(), first]);
    assert_eq!(fx.ctl.workflows.list(Some(1)).await.unwrap()[0].id, second);
    assert!(fx.ctl.workflows.list(Some(0)).await.unwrap().is_empty());

    let unknown = WorkflowId::new();
    assert!(matches!(
        fx.ctl.workflows.audit(&unknown).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        fx.ctl.workflows.get(&unknown).await,
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn tokens_gate_each_step() {
    let fx = fixture().await;
    fx.catalog("patch", "exit 0", 1).await;
    let tokens = &fx.ctl.tokens;

    let admin_secret = tokens.bootstrap_admin("admin").await.unwrap().unwrap();
    let requestor = tokens.issue_credential("rita", Role::Requestor, "").await.unwrap();
    let approver = tokens.issue_credential("val", Role::Approver, "").await.unwrap();

    let rita = tokens
        .authenticate(&requestor, Permission::CreateWorkflow)
        .await
        .unwrap();
    let wf = fx
        .ctl
        .workflows
        .create(&rita, CreateWorkflow { script_id: "patch".into(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(wf.requestor, "rita");

    assert!(matches!(
        tokens.authenticate(&requestor, Permission::DecideWorkflow).await,
        Err(CoreError::AuthorizationFailure { .. })
    ));
    let val = tokens
        .authenticate(&approver, Permission::DecideWorkflow)
        .await
        .unwrap();
    fx.ctl.workflows.approve(&wf.id, &val, "ok").await.unwrap();

    assert!(tokens
        .authenticate(&approver, Permission::ExecuteWorkflow)
        .await
        .is_err());
    let root = tokens
        .authenticate(&admin_secret, Permission::ExecuteWorkflow)
        .await
        .unwrap();
    let report = fx.ctl.workflows.execute(&wf.id, &root).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Success);

    let actors: Vec<String> = fx
        .ctl
        .workflows
        .audit(&wf.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.actor)
        .collect();
    assert_eq!(actors, ["admin", "val", "rita"]);
}
