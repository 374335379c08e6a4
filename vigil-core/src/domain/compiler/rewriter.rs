// vigil-core/src/domain/compiler/rewriter.rs

use sqlparser::ast::{
    Expr, Ident, ObjectName, ObjectNamePart, Query, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

pub struct TableRewriter;

impl TableRewriter {
    /// Redirects every base-table reference in `sql` to `target_table`.
    ///
    /// Used in flat-file mode: rule authors write against their "real" schema
    /// (`expenses`, `invoices`, ...) while the staged CSV lives under one
    /// table whose name is derived from the file. Operates on the parsed
    /// query structure, never on raw text, and leaves CTE aliases alone.
    /// The target identifier is always emitted quoted.
    pub fn redirect(sql: &str, target_table: &str) -> Result<String, anyhow::Error> {
        let dialect = GenericDialect {};
        let mut ast = Parser::parse_sql(&dialect, sql)?;

        // CTE aliases are query-local names, not tables to redirect
        let mut cte_names = HashSet::new();
        for stmt in &ast {
            if let Statement::Query(query) = stmt {
                Self::collect_cte_names(query, &mut cte_names);
            }
        }

        for stmt in &mut ast {
            if let Statement::Query(query) = stmt {
                Self::process_query(query, target_table, &cte_names);
            }
        }

        let result = ast
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        tracing::debug!("Redirected SQL: {}", result);
        Ok(result)
    }

    fn collect_cte_names(query: &Query, names: &mut HashSet<String>) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                names.insert(cte.alias.name.value.to_lowercase());
                Self::collect_cte_names(&cte.query, names);
            }
        }
    }

    fn process_query(query: &mut Query, target: &str, ctes: &HashSet<String>) {
        if let Some(with) = &mut query.with {
            for cte in &mut with.cte_tables {
                Self::process_query(&mut cte.query, target, ctes);
            }
        }
        Self::process_set_expr(&mut query.body, target, ctes);
    }

    fn process_set_expr(set_expr: &mut SetExpr, target: &str, ctes: &HashSet<String>) {
        match set_expr {
            SetExpr::Select(select) => {
                for table in &mut select.from {
                    Self::process_table_factor(&mut table.relation, target, ctes);
                    for join in &mut table.joins {
                        Self::process_table_factor(&mut join.relation, target, ctes);
                    }
                }
                if let Some(selection) = &mut select.selection {
                    Self::process_expr(selection, target, ctes);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                Self::process_set_expr(left, target, ctes);
                Self::process_set_expr(right, target, ctes);
            }
            SetExpr::Query(subquery) => Self::process_query(subquery, target, ctes),
            _ => {}
        }
    }

    fn process_table_factor(tf: &mut TableFactor, target: &str, ctes: &HashSet<String>) {
        match tf {
            TableFactor::Table { name, .. } => {
                if Self::resolves_to(name, target) || Self::is_cte(name, ctes) {
                    return;
                }
                *name = ObjectName(vec![ObjectNamePart::Identifier(Ident::with_quote(
                    '"', target,
                ))]);
            }
            TableFactor::Derived { subquery, .. } => {
                Self::process_query(subquery, target, ctes);
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                Self::process_table_factor(&mut table_with_joins.relation, target, ctes);
                for join in &mut table_with_joins.joins {
                    Self::process_table_factor(&mut join.relation, target, ctes);
                }
            }
            _ => {}
        }
    }

    // Subqueries can hide in WHERE (`IN (SELECT ...)`, `EXISTS (...)`)
    fn process_expr(expr: &mut Expr, target: &str, ctes: &HashSet<String>) {
        match expr {
            Expr::InSubquery { subquery, .. } => Self::process_query(subquery, target, ctes),
            Expr::Exists { subquery, .. } => Self::process_query(subquery, target, ctes),
            Expr::Subquery(subquery) => Self::process_query(subquery, target, ctes),
            Expr::BinaryOp { left, right, .. } => {
                Self::process_expr(left.as_mut(), target, ctes);
                Self::process_expr(right.as_mut(), target, ctes);
            }
            Expr::UnaryOp { expr, .. } => Self::process_expr(expr.as_mut(), target, ctes),
            Expr::Nested(inner) => Self::process_expr(inner.as_mut(), target, ctes),
            _ => {}
        }
    }

    fn resolves_to(name: &ObjectName, target: &str) -> bool {
        Self::last_identifier(name).is_some_and(|id| id.eq_ignore_ascii_case(target))
    }

    fn is_cte(name: &ObjectName, ctes: &HashSet<String>) -> bool {
        Self::last_identifier(name).is_some_and(|id| ctes.contains(&id.to_lowercase()))
    }

    fn last_identifier(name: &ObjectName) -> Option<String> {
        name.0.last().and_then(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.value.clone()),
            _ => None,
        })
    }
}

// --- UNIT TESTS ---
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_redirect_simple_from() -> Result<()> {
        let sql = "SELECT * FROM expenses WHERE category = 'personal'";
        let out = TableRewriter::redirect(sql, "report_2024")?;
        assert!(out.contains("FROM \"report_2024\""), "got: {out}");
        assert!(!out.contains("expenses"));
        Ok(())
    }

    #[test]
    fn test_redirect_handles_any_placeholder_name() -> Result<()> {
        // The engine does not know rule authors' table names in advance;
        // every base table must land on the staging table.
        for placeholder in ["expenses", "travel_bookings", "invoices"] {
            let sql = format!("SELECT id FROM {placeholder} WHERE amount > 100");
            let out = TableRewriter::redirect(&sql, "uploaded_data")?;
            assert!(out.contains("\"uploaded_data\""), "got: {out}");
        }
        Ok(())
    }

    #[test]
    fn test_redirect_leaves_matching_table_untouched() -> Result<()> {
        let sql = "SELECT * FROM report_2024 WHERE x = 1";
        let out = TableRewriter::redirect(sql, "report_2024")?;
        assert!(out.contains("report_2024"));
        // Still exactly one table reference
        assert_eq!(out.matches("report_2024").count(), 1);
        Ok(())
    }

    #[test]
    fn test_redirect_spares_cte_aliases() -> Result<()> {
        let sql = "WITH big AS (SELECT * FROM expenses WHERE amount > 500) \
                   SELECT * FROM big";
        let out = TableRewriter::redirect(sql, "staged")?;
        assert!(out.contains("\"staged\""), "got: {out}");
        // The CTE reference survives; only the base table moved
        assert!(out.to_lowercase().contains("from big"), "got: {out}");
        Ok(())
    }

    #[test]
    fn test_redirect_reaches_in_subqueries() -> Result<()> {
        let sql = "SELECT * FROM expenses WHERE id IN (SELECT id FROM invoices)";
        let out = TableRewriter::redirect(sql, "staged")?;
        assert!(!out.to_lowercase().contains("invoices"), "got: {out}");
        assert_eq!(out.matches("\"staged\"").count(), 2, "got: {out}");
        Ok(())
    }

    #[test]
    fn test_redirect_quotes_special_characters() -> Result<()> {
        let sql = "SELECT * FROM expenses";
        let out = TableRewriter::redirect(sql, "q3 report")?;
        assert!(out.contains("\"q3 report\""), "got: {out}");
        Ok(())
    }

    #[test]
    fn test_redirect_rejects_unparseable_sql() {
        assert!(TableRewriter::redirect("SELEKT * FRM expenses", "staged").is_err());
    }
}
