use std::path::{Path, PathBuf};
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve Bastion home directory.
///
/// Priority:
/// 1) BASTION_HOME
/// 2) HOME/USERPROFILE
/// 3) ./.bastion
pub fn bastion_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("BASTION_HOME") {
        return PathBuf::from(override_path);
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        return PathBuf::from(home).join(".bastion");
    }
    PathBuf::from(".").join(".bastion")
}

fn ensure_home_dir(home: &Path) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Bastion home directory {}: {}. Set BASTION_HOME or pass --database.",
                home.display(),
                err
            );
        });
    }
}

/// Default database path: ~/.bastion/bastion.sqlite
pub fn default_database_path() -> PathBuf {
    let home = bastion_home();
    ensure_home_dir(&home);
    home.join("bastion.sqlite")
}

/// Default config file: ~/.bastion/config.toml
pub fn default_config_path() -> PathBuf {
    bastion_home().join("config.toml")
}

/// Default logs directory: ~/.bastion/logs
pub fn default_logs_dir() -> PathBuf {
    let home = bastion_home();
    ensure_home_dir(&home);
    home.join("logs")
}

/// Default script working directory: ~/.bastion/scripts
pub fn default_scripts_dir() -> PathBuf {
    bastion_home().join("scripts")
}
