// vigil-core/src/domain/scan/rule.rs

use crate::domain::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business impact of a rule, carried through to its violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            // Severity is advisory metadata: fall back rather than reject the rule
            _ => Ok(Severity::Medium),
        }
    }
}

/// A declarative compliance rule targeting one table.
/// Invariant: at least one of `condition` / `sql_query` is non-empty,
/// otherwise the rule is unexecutable and must be skipped with a reported
/// error (see `RuleCompiler::compile`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub severity: Severity,
    /// Simple predicate text, e.g. `category = 'personal'`.
    pub condition: Option<String>,
    /// Precompiled executable SQL, used verbatim when present.
    pub sql_query: Option<String>,
    /// The table this rule applies to.
    pub target_table: String,
}

impl Rule {
    pub fn is_executable(&self) -> bool {
        self.sql_query.as_deref().is_some_and(|q| !q.trim().is_empty())
            || self.condition.as_deref().is_some_and(|c| !c.trim().is_empty())
    }
}

/// Which flavor of data source a connection points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    /// A queryable database file, opened in place (no data copy).
    Relational,
    /// An uploaded CSV, staged into an engine-private store before scanning.
    FlatFile,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Relational => "relational",
            TargetKind::FlatFile => "flat-file",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational" => Ok(TargetKind::Relational),
            "flat-file" | "csv" => Ok(TargetKind::FlatFile),
            other => Err(DomainError::UnknownTargetKind(other.to_string())),
        }
    }
}

/// A registered scan target. The engine only reads `locator` and `kind`;
/// exclusive activation is enforced by the store, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConnection {
    pub id: i64,
    pub name: String,
    pub kind: TargetKind,
    pub locator: String,
    pub active: bool,
}
