//! Configuration management CLI commands.

use std::path::PathBuf;

use clap::Subcommand;
use wfscache::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file if none exists
    Init,
}

/// Run a config subcommand. These don't initialize logging.
pub fn run(command: ConfigCommands, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let path = config_path.unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = ConfigFile::load_from(&path)?;
            println!("[cache]");
            println!("directory = {}", config.cache.directory.display());
            println!("batch_size = {}", config.cache.batch_size);
            println!("ttl_days = {}", config.cache.ttl_days);
            println!("overlap_policy = {}", config.cache.overlap_policy);
            println!();
            println!("[download]");
            println!("max_retries = {}", config.download.max_retries);
            println!("retry_base_delay_ms = {}", config.download.retry_base_delay_ms);
            println!("max_features = {}", optional(config.download.max_features));
            println!("page_size = {}", optional(config.download.page_size));
            println!("timeout = {}", config.download.timeout_secs);
            println!();
            println!("[logging]");
            println!("file = {}", config.logging.file.display());
            Ok(())
        }
        ConfigCommands::Init => {
            if ConfigFile::ensure_exists(&path)? {
                println!("Created {}", path.display());
            } else {
                println!("Configuration already exists: {}", path.display());
            }
            Ok(())
        }
    }
}

fn optional(value: Option<u64>) -> String {
    value.map_or_else(|| "(not set)".to_string(), |v| v.to_string())
}
