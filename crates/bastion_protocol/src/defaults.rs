//! Canonical default values shared across the services and CLI.

/// Port assumed for an agent that registers without one.
pub const DEFAULT_AGENT_PORT: u16 = 7614;
/// Seconds without a heartbeat before an agent is reported as stale.
pub const DEFAULT_AGENT_STALE_AFTER_SECS: u64 = 120;
/// Workflow time-to-live, in TTL units, when the request names none.
pub const DEFAULT_WORKFLOW_TTL: u32 = 60;
/// Seconds per TTL unit. TTLs are expressed in minutes.
pub const DEFAULT_TTL_UNIT_SECS: u64 = 60;
/// Upper bound on a dispatched script's runtime.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30 * 60;
/// Rows returned by a workflow listing when no limit is given.
pub const DEFAULT_LIST_LIMIT: u32 = 100;
/// Status recorded for an agent that registers or heartbeats without one.
pub const DEFAULT_AGENT_STATUS: &str = "online";
/// Audit note written when a workflow is found past its deadline.
pub const TTL_EXPIRED_NOTE: &str = "TTL expired";
/// Captured stderr for an execution stopped through its cancellation token.
pub const CANCELLED_EXECUTION_MESSAGE: &str = "execution cancelled";
