// vigil/src/commands/watch.rs
//
// USE CASE: Periodic sweeps of the active connection.

use std::path::Path;

use vigil_core::application::ScanDispatcher;

use crate::commands::open_store;

pub async fn execute(config_dir: &Path, interval: Option<u64>) -> anyhow::Result<()> {
    let (config, store) = open_store(config_dir)?;
    let interval_secs = interval.unwrap_or(config.scan_interval_secs);

    println!("⏰ Watching the active connection (every {interval_secs}s, Ctrl-C to stop)...");
    let dispatcher = ScanDispatcher::new(store);
    dispatcher.run_scheduler(interval_secs).await;

    // run_scheduler loops forever
    unreachable!("scheduler returned");
}
