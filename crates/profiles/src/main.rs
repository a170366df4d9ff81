use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use profiles::commands;
use profiles::commands::process::ProcessArgs;
use profiles::commands::resolve::ResolveArgs;
use profiles::setup::{connect_store, load_config};
use tracing_subscriber::EnvFilter;

/// Calibrated vertical profiles from UAS sensor flights.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Processing configuration (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the coefficient tables and report what was read or skipped
    CheckCoefs,
    /// Show the scoop, serials and coefficients a platform uses on a date
    Resolve(ResolveArgs),
    /// Build profiles from flight directories and export them as CSV
    Process(ProcessArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let cache = connect_store(&config).await?;

    match cli.command {
        Command::CheckCoefs => commands::check_coefs::run(&cache).await,
        Command::Resolve(args) => commands::resolve::run(&cache, config.validity, args).await,
        Command::Process(args) => commands::process::run(&cache, &config, args).await,
    }
}
