// vigil/src/commands/violations.rs
//
// USE CASE: Inspect or export recorded violations.

use anyhow::Context;
use std::path::{Path, PathBuf};

use vigil_core::infrastructure::store::ComplianceStore;

use crate::commands::open_store;

/// Rows fetched per export page, bounding memory however large the store is.
const EXPORT_BATCH_ROWS: usize = 1000;

pub fn execute(config_dir: &Path, limit: usize, export: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, store) = open_store(config_dir)?;

    match export {
        Some(path) => export_csv(&store, &path),
        None => list(&store, limit),
    }
}

fn list(store: &ComplianceStore, limit: usize) -> anyhow::Result<()> {
    let violations = store.list_violations(limit)?;
    if violations.is_empty() {
        println!("🎉 No violations recorded.");
        return Ok(());
    }

    // Rule names make the listing readable; a deleted rule keeps its id
    let rules = store.get_rules()?;
    let name_of = |rule_id: i64| {
        rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.name.as_str())
            .unwrap_or("<deleted rule>")
    };

    for violation in &violations {
        println!(
            "#{:<5} {:<25} {}[{}]  detected {}",
            violation.id,
            name_of(violation.rule_id),
            violation.table_name,
            violation.record_id,
            violation.detected_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("       {}", violation.detail);
    }
    println!("\n🚨 {} violation(s) shown.", violations.len());
    Ok(())
}

/// Streams the full violation history to `path` as CSV, one page at a time.
fn export_csv(store: &ComplianceStore, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create export file at {:?}", path))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record([
        "Violation ID",
        "Rule ID",
        "Rule Name",
        "Severity",
        "Table Name",
        "Record ID",
        "Detected At",
    ])?;

    let mut after_id = 0i64;
    let mut exported = 0usize;
    loop {
        let page = store.list_violation_export(after_id, EXPORT_BATCH_ROWS)?;
        let Some(last) = page.last() else {
            break;
        };
        after_id = last.id;
        exported += page.len();

        for row in &page {
            writer.write_record([
                row.id.to_string(),
                row.rule_id.to_string(),
                row.rule_name.clone(),
                row.severity.clone(),
                row.table_name.clone(),
                row.record_id.clone(),
                row.detected_at.clone(),
            ])?;
        }
    }
    writer.flush()?;

    println!("📤 Exported {} violation(s) to {}", exported, path.display());
    Ok(())
}
