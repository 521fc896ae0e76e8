pub mod assess;
pub mod history;
pub mod init;

use carepilot_config::AppConfig;
use std::path::PathBuf;

/// Where assessments are persisted: the configured store, or
/// `~/.carepilot/assessments.json`.
pub fn assessment_store(config: &AppConfig) -> PathBuf {
    config
        .memory
        .assessment_store
        .clone()
        .unwrap_or_else(|| AppConfig::config_dir().join("assessments.json"))
}

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
