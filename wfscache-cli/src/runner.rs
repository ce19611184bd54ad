//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and cache creation
//! to reduce duplication across command handlers.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use wfscache::config::ConfigFile;
use wfscache::logging::{init_logging, split_log_path, LoggingGuard};
use wfscache::{CacheConfig, DataSourceUri, ReqwestClient, SharedCache, WfsHttpSource};

use crate::error::CliError;

/// The cache type every command works with.
pub type HttpCache = SharedCache<WfsHttpSource<ReqwestClient>>;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Keeps the log file writer alive while the runner exists
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load config (from `config_path` or the default location) and
    /// initialize logging.
    ///
    /// `verbose` enables debug-level logging unless RUST_LOG is set.
    pub fn new(config_path: Option<PathBuf>, verbose: bool) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(&path)?,
            None => ConfigFile::load()?,
        };

        let (log_dir, log_file) = split_log_path(&config.logging.file);
        let level = if verbose { "debug" } else { "info" };
        let logging_guard = init_logging(&log_dir, &log_file, level)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!(version = wfscache::VERSION, command = command, "wfscache started");
    }

    /// Parse a data source descriptor.
    pub fn parse_uri(&self, descriptor: &str) -> Result<DataSourceUri, CliError> {
        Ok(DataSourceUri::parse(descriptor)?)
    }

    /// Open the on-disk cache of `uri`, describing the layer over HTTP.
    pub async fn open_cache(&self, uri: DataSourceUri) -> Result<HttpCache, CliError> {
        let client =
            ReqwestClient::with_timeout(Duration::from_secs(self.config.download.timeout_secs))?;
        let mut source = WfsHttpSource::new(client, uri.clone());
        if let Some(page_size) = self.config.download.page_size {
            source = source.with_page_size(page_size);
        }
        let cache_config = CacheConfig::from(&self.config);
        info!(cache_dir = %cache_config.cache_dir.display(), "Opening shared cache");
        Ok(SharedCache::open_on_disk(cache_config, uri, source).await?)
    }
}
