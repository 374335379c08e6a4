// vigil-core/src/infrastructure/config/mod.rs

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::infrastructure::error::InfrastructureError;

/// Engine settings. Everything has a default: a directory with no config
/// file at all is a valid deployment.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the engine keeps rules, jobs and violations.
    pub store_path: String,
    /// Pause between periodic sweeps, in seconds.
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_path: "vigil.duckdb".to_string(),
            scan_interval_secs: 300,
        }
    }
}

// --- LOADER ---

#[instrument(skip(dir))]
pub fn load_engine_config(dir: &Path) -> Result<EngineConfig, InfrastructureError> {
    let Some(config_path) = find_main_config(dir) else {
        info!("No configuration file found, using defaults");
        return Ok(EngineConfig::default());
    };
    info!(path = ?config_path, "Loading engine configuration");

    let content = fs::read_to_string(&config_path)?;
    let mut config: EngineConfig = serde_yaml::from_str(&content)?;

    apply_env_overrides(&mut config);
    Ok(config)
}

fn find_main_config(root: &Path) -> Option<PathBuf> {
    // Support yml/yaml
    let candidates = ["vigil.yml", "vigil.yaml"];
    candidates
        .iter()
        .map(|filename| root.join(filename))
        .find(|p| p.exists())
}

fn apply_env_overrides(config: &mut EngineConfig) {
    // Permet de faire: VIGIL_STORE_PATH=/tmp/audit.duckdb vigil scan ...
    if let Ok(val) = std::env::var("VIGIL_STORE_PATH") {
        info!(old = ?config.store_path, new = ?val, "Overriding store path via ENV");
        config.store_path = val;
    }
}
