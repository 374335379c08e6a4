// vigil/src/commands/connect.rs
//
// USE CASE: Register a scan target and make it the active connection.

use std::path::Path;
use std::str::FromStr;

use vigil_core::domain::scan::TargetKind;

use crate::commands::open_store;

pub fn execute(
    config_dir: &Path,
    name: String,
    locator: String,
    kind: String,
) -> anyhow::Result<()> {
    let kind = TargetKind::from_str(&kind)?;
    let (_, store) = open_store(config_dir)?;

    let connection = store.add_connection(&name, kind, &locator)?;
    store.activate_connection(connection.id)?;

    println!(
        "🔌 Connection #{} '{}' ({}) registered and activated.",
        connection.id, connection.name, connection.kind
    );
    println!("   Periodic sweeps ('vigil watch') will now target {locator}");
    Ok(())
}
