use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Abstraction for managing a throwaway Vigil deployment (config dir,
/// violation store, scan targets).
struct VigilTestEnv {
    tmp: TempDir,
}

impl VigilTestEnv {
    fn new() -> Result<Self> {
        Ok(Self {
            tmp: tempfile::tempdir()?,
        })
    }

    fn vigil(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vigil"));
        cmd.current_dir(self.tmp.path());
        cmd
    }

    fn write_csv(&self, name: &str, content: &str) -> Result<PathBuf> {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }

    fn write_database(&self, name: &str, ddl: &str) -> Result<PathBuf> {
        let path = self.tmp.path().join(name);
        let conn = duckdb::Connection::open(&path)?;
        conn.execute_batch(ddl)?;
        Ok(path)
    }

    fn add_personal_spend_rule(&self) -> Result<()> {
        self.vigil()
            .args([
                "rules",
                "add",
                "no personal spend",
                "--table",
                "expenses",
                "--condition",
                "category = 'personal'",
                "--severity",
                "high",
            ])
            .assert()
            .success();
        Ok(())
    }
}

#[test]
fn test_flat_file_scan_end_to_end() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;
    let csv = env.write_csv("expenses.csv", "id,category\n1,personal\n2,office\n")?;

    env.vigil()
        .args(["scan", "--file", &csv.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("no personal spend — 1 new violation(s)"))
        .stdout(predicate::str::contains("Status: completed"));

    // The violation carries the staged table and the matching row's identity
    env.vigil()
        .arg("violations")
        .assert()
        .success()
        .stdout(predicate::str::contains("expenses[1]"))
        .stdout(predicate::str::contains("\"category\":\"personal\""))
        .stdout(predicate::str::contains("1 violation(s) shown"));
    Ok(())
}

#[test]
fn test_rescanning_the_same_file_adds_nothing() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;
    let csv = env.write_csv("expenses.csv", "id,category\n1,personal\n2,office\n")?;
    let locator = csv.to_string_lossy().into_owned();

    env.vigil().args(["scan", "--file", &locator]).assert().success();

    // Second pass over identical data: same findings, zero new violations
    env.vigil()
        .args(["scan", "--file", &locator])
        .assert()
        .success()
        .stdout(predicate::str::contains("no personal spend — 0 new violation(s)"));

    env.vigil()
        .arg("violations")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 violation(s) shown"));
    Ok(())
}

#[test]
fn test_violations_export_writes_joined_csv() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;
    let csv = env.write_csv("expenses.csv", "id,category\n1,personal\n2,office\n3,personal\n")?;

    env.vigil()
        .args(["scan", "--file", &csv.to_string_lossy()])
        .assert()
        .success();

    let out = env.tmp.path().join("export.csv");
    env.vigil()
        .args(["violations", "--export", &out.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 violation(s)"));

    let exported = std::fs::read_to_string(&out)?;
    let lines: Vec<&str> = exported.lines().collect();
    assert_eq!(
        lines[0],
        "Violation ID,Rule ID,Rule Name,Severity,Table Name,Record ID,Detected At"
    );
    assert_eq!(lines.len(), 3, "header plus one row per violation");
    assert!(lines[1].contains("no personal spend,high,expenses,1"), "got: {}", lines[1]);
    assert!(lines[2].contains(",3,"), "got: {}", lines[2]);
    Ok(())
}

#[test]
fn test_broken_rule_does_not_block_the_others() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.vigil()
        .args([
            "rules",
            "add",
            "broken rule",
            "--table",
            "expenses",
            "--condition",
            "no_such_column = 1",
        ])
        .assert()
        .success();
    env.add_personal_spend_rule()?;
    let csv = env.write_csv("expenses.csv", "id,category\n1,personal\n")?;

    // The scan completes: the broken rule is reported, the good one still runs
    env.vigil()
        .args(["scan", "--file", &csv.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("⚠️  broken rule"))
        .stdout(predicate::str::contains("no personal spend — 1 new violation(s)"))
        .stdout(predicate::str::contains("Status: completed"));
    Ok(())
}

#[test]
fn test_scan_without_target_or_connection_fails() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.vigil()
        .arg("scan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no active connection"));
    Ok(())
}

#[test]
fn test_scan_missing_file_marks_the_job_failed() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;

    env.vigil()
        .args(["scan", "--file", "/nonexistent/void.csv"])
        .assert()
        .failure();

    env.vigil()
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"));
    Ok(())
}

#[test]
fn test_connect_then_scan_uses_the_active_connection() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;
    let db = env.write_database(
        "prod.duckdb",
        "CREATE TABLE expenses (id INTEGER, category VARCHAR);
         INSERT INTO expenses VALUES (1, 'personal'), (2, 'office'), (3, 'personal')",
    )?;

    env.vigil()
        .args(["connect", "prod", &db.to_string_lossy()])
        .assert()
        .success()
        .stdout(predicate::str::contains("registered and activated"));

    env.vigil()
        .arg("scan")
        .assert()
        .success()
        .stdout(predicate::str::contains("Using active connection 'prod'"))
        .stdout(predicate::str::contains("no personal spend — 2 new violation(s)"));
    Ok(())
}

#[test]
fn test_jobs_report_terminal_status_and_full_progress() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.add_personal_spend_rule()?;
    let csv = env.write_csv("expenses.csv", "id,category\n1,personal\n")?;

    env.vigil()
        .args(["scan", "--file", &csv.to_string_lossy()])
        .assert()
        .success();

    env.vigil()
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("100%"))
        .stdout(predicate::str::contains("expenses.csv"));

    env.vigil()
        .args(["jobs", "--id", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Status:     completed (100%)"))
        .stdout(predicate::str::contains("✅ rule 1 — 1 violation(s)"));
    Ok(())
}

#[test]
fn test_rules_listing_flags_blank_predicates() -> Result<()> {
    let env = VigilTestEnv::new()?;
    // Whitespace passes the CLI presence check but can never compile
    env.vigil()
        .args(["rules", "add", "hollow rule", "--table", "expenses", "--condition", "   "])
        .assert()
        .success();
    env.add_personal_spend_rule()?;

    env.vigil()
        .arg("rules")
        .assert()
        .success()
        .stdout(predicate::str::contains("<not executable>"))
        .stdout(predicate::str::contains("category = 'personal'"));
    Ok(())
}

#[test]
fn test_empty_store_listings() -> Result<()> {
    let env = VigilTestEnv::new()?;
    env.vigil()
        .arg("rules")
        .assert()
        .success()
        .stdout(predicate::str::contains("No rules defined"));
    env.vigil()
        .arg("jobs")
        .assert()
        .success()
        .stdout(predicate::str::contains("No scan jobs yet"));
    env.vigil()
        .arg("violations")
        .assert()
        .success()
        .stdout(predicate::str::contains("No violations recorded"));
    Ok(())
}
