// vigil-core/src/domain/compiler/mod.rs

pub mod rewriter;

pub use rewriter::TableRewriter;

use crate::domain::error::DomainError;
use crate::domain::scan::Rule;

pub struct RuleCompiler;

impl RuleCompiler {
    /// Produces the executable query for one rule. PURE: no database access.
    ///
    /// * Precompiled `sql_query` is used verbatim — except in flat-file mode
    ///   (`staging_table` is `Some`), where base-table references are
    ///   redirected onto the staging identifier so rules stay portable
    ///   between a real schema and an ad hoc upload.
    /// * Otherwise a `condition` predicate is wrapped into a full SELECT
    ///   against the resolved table, always quoted.
    /// * A rule with neither is unexecutable and must surface as an error,
    ///   never be skipped silently.
    pub fn compile(rule: &Rule, staging_table: Option<&str>) -> Result<String, DomainError> {
        if let Some(sql) = rule.sql_query.as_deref().filter(|q| !q.trim().is_empty()) {
            return match staging_table {
                Some(staging) => {
                    TableRewriter::redirect(sql, staging).map_err(|e| DomainError::QueryParse {
                        rule_id: rule.id,
                        message: e.to_string(),
                    })
                }
                None => Ok(sql.to_string()),
            };
        }

        if let Some(condition) = rule.condition.as_deref().filter(|c| !c.trim().is_empty()) {
            let table = staging_table.unwrap_or(rule.target_table.as_str());
            return Ok(format!(
                "SELECT * FROM \"{}\" WHERE {}",
                table.replace('"', "\"\""),
                condition
            ));
        }

        Err(DomainError::RuleNotExecutable { rule_id: rule.id })
    }
}

// --- UNIT TESTS ---
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::scan::{Rule, Severity};
    use anyhow::Result;

    fn rule(condition: Option<&str>, sql_query: Option<&str>) -> Rule {
        Rule {
            id: 7,
            name: "test rule".to_string(),
            description: String::new(),
            severity: Severity::Medium,
            condition: condition.map(str::to_string),
            sql_query: sql_query.map(str::to_string),
            target_table: "expenses".to_string(),
        }
    }

    #[test]
    fn test_precompiled_query_is_verbatim_in_relational_mode() -> Result<()> {
        let sql = "SELECT * FROM expenses WHERE amount > 100";
        let compiled = RuleCompiler::compile(&rule(None, Some(sql)), None)?;
        assert_eq!(compiled, sql);
        Ok(())
    }

    #[test]
    fn test_precompiled_query_is_redirected_in_flat_file_mode() -> Result<()> {
        let sql = "SELECT * FROM travel_bookings WHERE cost > 500";
        let compiled = RuleCompiler::compile(&rule(None, Some(sql)), Some("upload"))?;
        assert!(compiled.contains("\"upload\""), "got: {compiled}");
        Ok(())
    }

    #[test]
    fn test_condition_is_wrapped_with_quoted_table() -> Result<()> {
        let compiled = RuleCompiler::compile(&rule(Some("category = 'personal'"), None), None)?;
        assert_eq!(
            compiled,
            "SELECT * FROM \"expenses\" WHERE category = 'personal'"
        );
        Ok(())
    }

    #[test]
    fn test_condition_targets_staging_table_when_staged() -> Result<()> {
        let compiled =
            RuleCompiler::compile(&rule(Some("amount > 9000"), None), Some("q3_upload"))?;
        assert_eq!(compiled, "SELECT * FROM \"q3_upload\" WHERE amount > 9000");
        Ok(())
    }

    #[test]
    fn test_query_takes_precedence_over_condition() -> Result<()> {
        let compiled = RuleCompiler::compile(
            &rule(Some("ignored = 1"), Some("SELECT 1 FROM expenses")),
            None,
        )?;
        assert_eq!(compiled, "SELECT 1 FROM expenses");
        Ok(())
    }

    #[test]
    fn test_rule_with_neither_predicate_is_an_error() {
        let err = RuleCompiler::compile(&rule(None, None), None);
        assert!(matches!(
            err,
            Err(DomainError::RuleNotExecutable { rule_id: 7 })
        ));
        // Blank strings do not count as predicates either
        let err = RuleCompiler::compile(&rule(Some("  "), Some("")), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_broken_sql_is_a_compile_error_in_flat_file_mode() {
        let err = RuleCompiler::compile(&rule(None, Some("SELEKT oops")), Some("upload"));
        assert!(matches!(err, Err(DomainError::QueryParse { rule_id: 7, .. })));
    }
}
