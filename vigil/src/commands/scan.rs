// vigil/src/commands/scan.rs
//
// USE CASE: Run one compliance scan on demand.

use anyhow::bail;
use std::path::Path;

use vigil_core::application::{ScanDispatcher, TargetSpec};
use vigil_core::domain::scan::{ScanJob, ScanStatus};

use crate::commands::open_store;

pub async fn execute(
    config_dir: &Path,
    file: Option<String>,
    db: Option<String>,
) -> anyhow::Result<()> {
    let start = std::time::Instant::now();
    let (_, store) = open_store(config_dir)?;

    let spec = match (file, db) {
        (Some(_), Some(_)) => bail!("--file and --db are mutually exclusive"),
        (Some(file), None) => TargetSpec::flat_file(file),
        (None, Some(db)) => TargetSpec::relational(db),
        (None, None) => match store.get_active_connection()? {
            Some(connection) => {
                println!("🔌 Using active connection '{}'", connection.name);
                TargetSpec {
                    locator: connection.locator,
                    kind: connection.kind,
                }
            }
            None => bail!("No target given and no active connection (see 'vigil connect')"),
        },
    };

    println!("🔍 Scanning {} ({})...", spec.locator, spec.kind);
    let rules = store.get_rules()?;
    if rules.is_empty() {
        println!("⚠️  No rules defined: the scan will complete with nothing to check.");
    }

    let dispatcher = ScanDispatcher::new(store);
    let job = dispatcher.scan_once(&spec).await?;

    print_report(&dispatcher, &job)?;
    println!("\n✨ Scan finished in {:.2?}", start.elapsed());

    if job.status != ScanStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(dispatcher: &ScanDispatcher, job: &ScanJob) -> anyhow::Result<()> {
    let rules = dispatcher.store().get_rules()?;
    let name_of = |rule_id: i64| {
        rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.name.as_str())
            .unwrap_or("<deleted rule>")
    };

    println!("\n📊 Scan job #{} — {}", job.id, job.table_name);
    for outcome in &job.rule_results {
        match &outcome.error {
            None => println!(
                "   ✅ {} — {} new violation(s)",
                name_of(outcome.rule_id),
                outcome.violations
            ),
            Some(error) => println!("   ⚠️  {} — {}", name_of(outcome.rule_id), error),
        }
    }
    println!(
        "   Status: {} | records scanned: {} | new violations: {}",
        job.status, job.records_scanned, job.violations_found
    );
    Ok(())
}
