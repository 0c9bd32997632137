//! LeadScout command-line shell.
//!
//! Thin front end over the library crates: it loads configuration, opens the
//! lead database and source definitions, then hands off to a subcommand.

mod commands;
mod state;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

/// Discover business leads from public web sources.
#[derive(Debug, Parser)]
#[command(name = "leadscout", version, about)]
pub struct Cli {
    /// Configuration file (defaults to the XDG config path)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Lead database path (overrides `storage.database_path`)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Directory of source definitions
    #[arg(long, global = true)]
    pub sources_dir: Option<PathBuf>,

    /// Log at debug level regardless of `RUST_LOG`
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a discovery job
    Run(commands::run::RunArgs),
    /// Resume a cancelled or interrupted job from its checkpoint
    Resume(commands::run::ResumeArgs),
    /// List recorded jobs
    Jobs(commands::jobs::JobsArgs),
    /// Export stored leads
    Export(commands::export::ExportArgs),
    /// Show storage statistics
    Stats(commands::export::StatsArgs),
    /// List the loaded source definitions
    Sources(commands::sources::SourcesArgs),
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,leadscout=debug"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => args.execute(&cli).await,
        Commands::Resume(args) => args.execute(&cli).await,
        Commands::Jobs(args) => args.execute(&cli).await,
        Commands::Export(args) => args.execute(&cli).await,
        Commands::Stats(args) => args.execute(&cli).await,
        Commands::Sources(args) => args.execute(&cli),
    };

    if let Err(e) = result {
        error!("Command failed: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["leadscout", "stats", "--db", "/tmp/leads.db", "-v"])
            .expect("parse");
        assert!(cli.verbose);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/leads.db")));
        assert!(matches!(cli.command, Commands::Stats(_)));
    }
}
