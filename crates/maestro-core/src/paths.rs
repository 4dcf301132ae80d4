//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

const CONFIG_DIR_NAME: &str = ".maestro";

/// Get the maestro config directory (~/.maestro)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.maestro/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Get the workflow state directory (~/.maestro/workflows)
pub fn workflows_dir() -> PathBuf {
    config_dir().join("workflows")
}

/// Ensure the workflow state directory exists, creating it if necessary
pub fn ensure_workflows_dir() -> std::io::Result<PathBuf> {
    let dir = workflows_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Ensure the logs directory exists, creating it if necessary
pub fn ensure_logs_dir() -> std::io::Result<PathBuf> {
    let dir = logs_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
