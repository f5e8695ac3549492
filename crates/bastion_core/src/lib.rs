//! Bastion core services.
//!
//! - [`TokenAuthority`] hashes, stores and checks bearer credentials.
//! - [`AgentRegistry`] tracks agents and derives their liveness.
//! - [`ScriptCatalog`] holds the scripts workflows may run.
//! - [`WorkflowEngine`] drives the approval state machine and dispatches
//!   approved scripts.
//!
//! [`Controller`] wires all four over one [`BastionDb`] handle.

pub mod agents;
pub mod auth;
pub mod cancel;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod executor;
pub mod workflow;

pub use agents::{AgentRegistration, AgentRegistry, AgentView, RegistrationPolicy};
pub use auth::{Permission, Principal, TokenAuthority, BOOTSTRAP_ADMIN_NAME};
pub use cancel::CancellationToken;
pub use catalog::ScriptCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use executor::{ExecutionOutcome, ExecutionOutput, ScriptRunner};
pub use workflow::{
    ApprovalReceipt, CreateWorkflow, EngineSettings, ExecutionReport, WorkflowEngine,
};

use bastion_db::BastionDb;
use bastion_protocol::BastionConfig;
use std::sync::Arc;

/// All services sharing one store and one clock.
#[derive(Debug, Clone)]
pub struct Controller {
    pub tokens: TokenAuthority,
    pub agents: AgentRegistry,
    pub catalog: ScriptCatalog,
    pub workflows: WorkflowEngine,
}

impl Controller {
    pub fn new(db: BastionDb, config: &BastionConfig, clock: Arc<dyn Clock>) -> Self {
        let catalog = ScriptCatalog::new(db.clone());
        let workflows = WorkflowEngine::new(
            db.clone(),
            catalog.clone(),
            ScriptRunner::new(config.execution_timeout()),
            clock.clone(),
            EngineSettings::from_config(config),
        );

        Self {
            tokens: TokenAuthority::new(db.clone(), clock.clone()),
            agents: AgentRegistry::new(
                db,
                clock,
                config.stale_after(),
                RegistrationPolicy::from_config(config),
            ),
            catalog,
            workflows,
        }
    }

    pub fn with_system_clock(db: BastionDb, config: &BastionConfig) -> Self {
        Self::new(db, config, Arc::new(SystemClock))
    }
}
