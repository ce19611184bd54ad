//! Cache management CLI commands.

use std::path::Path;

use clap::Subcommand;
use wfscache::coordinator::CacheConfig;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show statistics of one layer's cache
    Stats {
        /// Data source descriptor
        #[arg(long)]
        uri: String,
    },
    /// Delete cached layers; all of them unless --uri is given
    Clear {
        /// Data source descriptor
        #[arg(long)]
        uri: Option<String>,
    },
}

/// Run a cache subcommand.
pub async fn run(runner: &CliRunner, action: CacheAction) -> Result<(), CliError> {
    match action {
        CacheAction::Stats { uri } => {
            runner.log_startup("cache stats");
            let uri = runner.parse_uri(&uri)?;
            let cache = runner.open_cache(uri).await?;
            let stats = cache.stats()?;

            println!("Cache for {}", cache.uri().type_name);
            println!("  Rows:        {}", stats.rows);
            println!("  Generation:  {}", stats.generation);
            println!(
                "  Regions:     {} ({} complete)",
                stats.regions, stats.completed_regions
            );
            let exactness = if stats.count_exact { "exact" } else { "unknown" };
            println!("  Layer count: {} ({})", stats.feature_count, exactness);
            Ok(())
        }
        CacheAction::Clear { uri } => {
            let cache_dir = CacheConfig::from(runner.config()).cache_dir;
            let removed = match uri {
                Some(uri) => {
                    let uri = runner.parse_uri(&uri)?;
                    clear_files(&cache_dir, Some(&uri.cache_key()))?
                }
                None => clear_files(&cache_dir, None)?,
            };
            println!("Removed {} files from {}", removed, cache_dir.display());
            Ok(())
        }
    }
}

/// Remove SQLite stores (and their WAL side files) from `dir`.
///
/// With `key`, only that store is removed.
fn clear_files(dir: &Path, key: Option<&str>) -> Result<usize, CliError> {
    if !dir.exists() {
        return Ok(0);
    }
    let io_err = |error| CliError::Io {
        path: dir.display().to_string(),
        error,
    };
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = [".sqlite", ".sqlite-wal", ".sqlite-shm"]
            .iter()
            .find_map(|ext| name.strip_suffix(ext))
        else {
            continue;
        };
        if key.is_some_and(|k| k != stem) {
            continue;
        }
        std::fs::remove_file(&path).map_err(|error| CliError::Io {
            path: path.display().to_string(),
            error,
        })?;
        removed += 1;
    }
    Ok(removed)
}
