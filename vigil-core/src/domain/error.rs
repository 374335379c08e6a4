// vigil-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("Rule {rule_id} is not executable: it has neither a condition nor a SQL query")]
    #[diagnostic(
        code(vigil::domain::rule_not_executable),
        help("Give the rule either a 'condition' predicate or a full 'sql_query'.")
    )]
    RuleNotExecutable { rule_id: i64 },

    #[error("Rule {rule_id} query could not be parsed: {message}")]
    #[diagnostic(
        code(vigil::domain::query_parse),
        help("Flat-file scans rewrite table names on the parsed query, so the SQL must be valid.")
    )]
    QueryParse { rule_id: i64, message: String },

    #[error("Illegal scan job transition: {from} -> {to}")]
    #[diagnostic(
        code(vigil::domain::job_transition),
        help("'completed', 'failed' and 'cancelled' are terminal and write-once.")
    )]
    InvalidTransition { from: String, to: String },

    #[error("Unknown scan status '{0}'")]
    #[diagnostic(code(vigil::domain::unknown_status))]
    UnknownStatus(String),

    #[error("Unknown target kind '{0}'")]
    #[diagnostic(
        code(vigil::domain::unknown_target_kind),
        help("Supported kinds are 'relational' and 'flat-file'.")
    )]
    UnknownTargetKind(String),
}
