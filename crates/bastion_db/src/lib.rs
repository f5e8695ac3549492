//! Persistence layer for Bastion.
//!
//! One `BastionDb` handle is opened at process start and cloned into every
//! service that needs storage. Each domain keeps its queries in its own
//! `impl BastionDb` block.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bastion_db::{BastionDb, Result};
//!
//! let db = BastionDb::open("~/.bastion/bastion.sqlite").await?;
//!
//! let scripts = db.script_list().await?;
//! let trail = db.workflow_audit(&workflow_id).await?;
//!
//! db.close().await;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod agents;
mod audit;
mod credentials;
mod scripts;
mod workflows;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the Bastion store.
#[derive(Clone, Debug)]
pub struct BastionDb {
    pool: SqlitePool,
}

impl BastionDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open a private in-memory database (for testing).
    ///
    /// Pinned to a single connection that never recycles, since every
    /// SQLite connection to `:memory:` sees its own database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl BastionDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}
