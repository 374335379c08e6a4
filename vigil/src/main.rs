// vigil/src/main.rs

mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug vigil scan ... pour voir les détails
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config_dir = cli.config_dir;

    match cli.command {
        Commands::Scan { file, db } => commands::scan::execute(&config_dir, file, db).await,
        Commands::Watch { interval } => commands::watch::execute(&config_dir, interval).await,
        Commands::Jobs { id, limit } => commands::jobs::execute(&config_dir, id, limit),
        Commands::Violations { limit, export } => {
            commands::violations::execute(&config_dir, limit, export)
        }
        Commands::Rules { action } => commands::rules::execute(&config_dir, action),
        Commands::Connect { name, locator, kind } => {
            commands::connect::execute(&config_dir, name, locator, kind)
        }
    }
}
