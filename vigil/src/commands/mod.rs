// vigil/src/commands/mod.rs

pub mod connect;
pub mod jobs;
pub mod rules;
pub mod scan;
pub mod violations;
pub mod watch;

use anyhow::Context;
use std::path::Path;

use vigil_core::infrastructure::config::{EngineConfig, load_engine_config};
use vigil_core::infrastructure::store::ComplianceStore;

/// Shared bootstrap for every command: configuration + violation store.
pub fn open_store(config_dir: &Path) -> anyhow::Result<(EngineConfig, ComplianceStore)> {
    let config = load_engine_config(config_dir)
        .with_context(|| format!("Failed to load configuration from {:?}", config_dir))?;

    // An absolute store_path wins over config_dir
    let store_path = config_dir.join(&config.store_path);
    let store = ComplianceStore::open(&store_path.to_string_lossy())
        .with_context(|| format!("Failed to open violation store at {:?}", store_path))?;

    Ok((config, store))
}
