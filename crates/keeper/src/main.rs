//! Keeper - session store maintenance and inspection tool
//!
//! Main entry point for the Keeper CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{check, inspect, run, stats, sweep};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Keeper - session store maintenance and inspection tool
#[derive(Parser)]
#[command(name = "keeper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file path
    #[arg(short, long, global = true, env = "KEEPER_CONFIG", default_value = "keeper.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate session files
    Check(check::CheckArgs),

    /// Show the contents of a session file
    Inspect(inspect::InspectArgs),

    /// Delete expired session files
    Sweep(sweep::SweepArgs),

    /// Summarize the session directory
    Stats(stats::StatsArgs),

    /// Run the engine with its background job thread until stdin closes
    Run(run::RunArgs),
}

impl Commands {
    fn needs_config(&self) -> bool {
        matches!(self, Commands::Sweep(_) | Commands::Stats(_) | Commands::Run(_))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.command.needs_config() {
        Some(keeper_config::load_config_file(&cli.config)?)
    } else {
        None
    };

    init_tracing(cli.verbose, config.as_ref().map(|c| &c.logging));

    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Check(args) => check::run(args, &ctx),
        Commands::Inspect(args) => inspect::run(args, &ctx),
        Commands::Sweep(args) => sweep::run(args, &ctx),
        Commands::Stats(args) => stats::run(args, &ctx),
        Commands::Run(args) => run::run(args, &ctx),
    }
}

/// Console logging to stderr. `--verbose` wins, then `RUST_LOG`, then the
/// config file's `[logging].level`.
fn init_tracing(verbose: bool, logging: Option<&keeper_config::LoggingSection>) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = if verbose {
        EnvFilter::new("keeper=debug,keeper_session=debug,keeper_config=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(logging.map(|l| l.level.as_str()).unwrap_or("warn"))
        })
    };

    let json = logging.is_some_and(|l| l.json);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
