//! Default values for every configuration key.

use super::file::config_directory;
use super::settings::{CacheSettings, ConfigFile, DownloadSettings, LoggingSettings};
use crate::coordinator::{default_cache_dir, OverlapPolicy, DEFAULT_READER_BATCH_SIZE};
use crate::download::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::source::DEFAULT_HTTP_TIMEOUT_SECS;

/// Default persisted cache lifetime in days.
pub const DEFAULT_TTL_DAYS: u64 = 7;

/// Default log file name inside the config directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "wfscache.log";

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                directory: default_cache_dir(),
                batch_size: DEFAULT_READER_BATCH_SIZE,
                ttl_days: DEFAULT_TTL_DAYS,
                overlap_policy: OverlapPolicy::default(),
            },
            download: DownloadSettings {
                max_retries: DEFAULT_MAX_RETRIES,
                retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
                max_features: None,
                page_size: None,
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            logging: LoggingSettings {
                file: config_directory().join(DEFAULT_LOG_FILE_NAME),
            },
        }
    }
}
