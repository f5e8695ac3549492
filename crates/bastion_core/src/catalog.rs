//! Script catalog.

use crate::error::{CoreError, Result};
use bastion_db::{BastionDb, Script};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ScriptCatalog {
    db: BastionDb,
}

impl ScriptCatalog {
    pub fn new(db: BastionDb) -> Self {
        Self { db }
    }

    /// Replace-by-id upsert.
    pub async fn add(&self, script: Script) -> Result<Script> {
        let script = Script {
            id: script.id.trim().to_string(),
            file: script.file.trim().to_string(),
            allowed_tags: script
                .allowed_tags
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            ..script
        };

        if script.id.is_empty() {
            return Err(CoreError::invalid_request("script id must not be empty"));
        }
        if script.file.is_empty() {
            return Err(CoreError::invalid_request("script file must not be empty"));
        }
        if script.required_approval_levels < 1 {
            return Err(CoreError::invalid_request(
                "required approval levels must be at least 1",
            ));
        }

        self.db.script_upsert(&script).await?;
        info!(
            script = %script.id,
            file = %script.file,
            levels = script.required_approval_levels,
            "Script catalogued"
        );
        Ok(script)
    }

    pub async fn get(&self, id: &str) -> Result<Script> {
        self.find(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Script {}", id)))
    }

    pub(crate) async fn find(&self, id: &str) -> Result<Option<Script>> {
        Ok(self.db.script_get(id).await?)
    }

    /// Ordered by id.
    pub async fn list(&self) -> Result<Vec<Script>> {
        Ok(self.db.script_list().await?)
    }
}

/// Resolve a catalogued file against the working directory unless already absolute.
pub fn resolve_script_path(working_dir: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}
