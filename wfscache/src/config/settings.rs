//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types with no parsing or serialization logic.

use std::path::PathBuf;

use crate::coordinator::OverlapPolicy;

/// Complete application configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Cache settings
    pub cache: CacheSettings,
    /// Download settings
    pub download: DownloadSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Directory holding one SQLite file per cached resource
    pub directory: PathBuf,
    /// Rows returned per reader batch
    pub batch_size: usize,
    /// Days a persisted cache may be reused before it is discarded
    pub ttl_days: u64,
    /// What happens when a new region arrives while a run is active
    pub overlap_policy: OverlapPolicy,
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    /// Retries of a page after a transient error
    pub max_retries: u32,
    /// Base delay of the exponential backoff in milliseconds
    pub retry_base_delay_ms: u64,
    /// Client-side cap on features per run
    pub max_features: Option<u64>,
    /// Features requested per page
    pub page_size: Option<u64>,
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log file path
    pub file: PathBuf,
}
