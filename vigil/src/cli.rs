// vigil/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "The Compliance Rule Execution & Violation Detection Engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding vigil.yml and the default violation store
    #[arg(long, default_value = ".", global = true)]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🔍 Runs one compliance scan and reports per-rule results
    Scan {
        /// Scan an uploaded CSV file
        #[arg(long, short)]
        file: Option<String>,

        /// Scan a database file in place
        #[arg(long)]
        db: Option<String>,
    },

    /// ⏰ Sweeps the active connection on a fixed schedule, forever
    Watch {
        /// Seconds between sweeps (defaults to the configured interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// 📊 Shows scan jobs (most recent first) or one job in detail
    Jobs {
        /// Show one job by id, with per-rule outcomes
        #[arg(long)]
        id: Option<i64>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// 🚨 Lists recorded violations (most recent first)
    Violations {
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Export every violation (with rule name and severity) as CSV
        /// to this file instead of listing
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// 📋 Manages compliance rules
    Rules {
        #[command(subcommand)]
        action: Option<RuleAction>,
    },

    /// 🔌 Registers a scan target and makes it the active connection
    Connect {
        /// Display name for the connection
        name: String,

        /// Database file path or CSV file path
        locator: String,

        /// Target kind: relational | flat-file
        #[arg(long, default_value = "relational")]
        kind: String,
    },
}

#[derive(Subcommand)]
pub enum RuleAction {
    /// Lists all rules in execution order
    List,

    /// Adds a rule (give --condition, --sql, or both)
    Add {
        name: String,

        /// Table the rule applies to
        #[arg(long, short)]
        table: String,

        /// Simple predicate, e.g. "category = 'personal'"
        #[arg(long)]
        condition: Option<String>,

        /// Full SQL query returning the violating rows
        #[arg(long)]
        sql: Option<String>,

        /// low | medium | high | critical
        #[arg(long, default_value = "medium")]
        severity: String,

        #[arg(long, default_value = "")]
        description: String,
    },
}
