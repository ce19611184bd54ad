//! wfscache CLI - Command-line interface
//!
//! Downloads WFS layers into the local feature cache and inspects it.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::count::CountArgs;
use commands::fetch::FetchArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "wfscache")]
#[command(version = wfscache::VERSION)]
#[command(about = "Client-side cache for WFS feature services", long_about = None)]
struct Cli {
    /// Use this config file instead of ~/.wfscache/config.ini
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download features into the cache
    Fetch(FetchArgs),
    /// Print the number of features in a layer
    Count(CountArgs),
    /// Inspect or clear cached layers
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        e.exit();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let command = match cli.command {
        Commands::Config { command } => return commands::config::run(command, cli.config),
        other => other,
    };

    let runner = CliRunner::new(cli.config, cli.verbose)?;
    match command {
        Commands::Fetch(args) => commands::fetch::run(&runner, args).await,
        Commands::Count(args) => commands::count::run(&runner, args).await,
        Commands::Cache { action } => commands::cache::run(&runner, action).await,
        Commands::Config { .. } => Ok(()),
    }
}
