// vigil/src/commands/jobs.rs
//
// USE CASE: Inspect scan job progress and outcomes.

use anyhow::bail;
use std::path::Path;

use vigil_core::domain::scan::ScanJob;

use crate::commands::open_store;

pub fn execute(config_dir: &Path, id: Option<i64>, limit: usize) -> anyhow::Result<()> {
    let (_, store) = open_store(config_dir)?;

    match id {
        Some(id) => {
            let Some(job) = store.get_scan_job(id)? else {
                bail!("No scan job with id {}", id);
            };
            print_detail(&job);
        }
        None => {
            let jobs = store.list_jobs(limit)?;
            if jobs.is_empty() {
                println!("📭 No scan jobs yet.");
                return Ok(());
            }
            for job in jobs {
                print_line(&job);
            }
        }
    }
    Ok(())
}

fn print_line(job: &ScanJob) {
    println!(
        "#{:<5} {:<12} {:>3}%  {:>6} violation(s)  {:<20} started {}",
        job.id,
        job.status.to_string(),
        job.progress,
        job.violations_found,
        job.table_name,
        job.start_time.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_detail(job: &ScanJob) {
    println!("📊 Scan job #{}", job.id);
    println!("   Target:     {}", job.table_name);
    println!("   Status:     {} ({}%)", job.status, job.progress);
    println!("   Records:    {}", job.records_scanned);
    println!("   Violations: {}", job.violations_found);
    println!("   Started:    {}", job.start_time.to_rfc3339());
    if let Some(end) = job.end_time {
        println!("   Ended:      {}", end.to_rfc3339());
    }
    if !job.rule_results.is_empty() {
        println!("   Rules:");
        for outcome in &job.rule_results {
            match &outcome.error {
                None => println!(
                    "     ✅ rule {} — {} violation(s)",
                    outcome.rule_id, outcome.violations
                ),
                Some(error) => println!("     ⚠️  rule {} — {}", outcome.rule_id, error),
            }
        }
    }
}
