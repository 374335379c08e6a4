// vigil/src/commands/rules.rs
//
// USE CASE: Manage the compliance rule set.

use anyhow::bail;
use std::path::Path;
use std::str::FromStr;

use vigil_core::domain::scan::Severity;
use vigil_core::infrastructure::store::NewRule;

use crate::cli::RuleAction;
use crate::commands::open_store;

pub fn execute(config_dir: &Path, action: Option<RuleAction>) -> anyhow::Result<()> {
    match action.unwrap_or(RuleAction::List) {
        RuleAction::List => list(config_dir),
        RuleAction::Add {
            name,
            table,
            condition,
            sql,
            severity,
            description,
        } => add(config_dir, name, table, condition, sql, severity, description),
    }
}

fn list(config_dir: &Path) -> anyhow::Result<()> {
    let (_, store) = open_store(config_dir)?;
    let rules = store.get_rules()?;
    if rules.is_empty() {
        println!("📭 No rules defined (see 'vigil rules add').");
        return Ok(());
    }

    for rule in &rules {
        // A rule with only blank predicates will be reported as an error
        // on every scan; flag it here too
        let predicate = if rule.is_executable() {
            rule.sql_query
                .as_deref()
                .filter(|q| !q.trim().is_empty())
                .or(rule.condition.as_deref())
                .unwrap_or_default()
        } else {
            "<not executable>"
        };
        println!(
            "#{:<5} [{:<8}] {:<25} on {:<15} {}",
            rule.id, rule.severity, rule.name, rule.target_table, predicate
        );
    }
    println!("\n📋 {} rule(s).", rules.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add(
    config_dir: &Path,
    name: String,
    table: String,
    condition: Option<String>,
    sql: Option<String>,
    severity: String,
    description: String,
) -> anyhow::Result<()> {
    if condition.is_none() && sql.is_none() {
        bail!("A rule needs --condition or --sql to be executable");
    }

    let (_, store) = open_store(config_dir)?;
    let rule = store.add_rule(NewRule {
        name,
        description,
        // Lenient parse: unknown severities fall back to medium
        severity: Severity::from_str(&severity)?,
        condition,
        sql_query: sql,
        target_table: table,
    })?;

    println!("✨ Rule #{} '{}' added.", rule.id, rule.name);
    Ok(())
}
