//! Coordinator configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::download::DownloadConfig;

/// Default number of rows a reader fetches per batch.
pub const DEFAULT_READER_BATCH_SIZE: usize = 500;

/// Default age after which a persisted cache is discarded (7 days).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// What a registration does when its extent is not covered while another
/// run is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Cancel the active run and restart on the union of both extents.
    #[default]
    Supersede,
    /// Wait for the active run; queued extents are merged into one next run.
    Queue,
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::Supersede => write!(f, "supersede"),
            OverlapPolicy::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supersede" => Ok(OverlapPolicy::Supersede),
            "queue" => Ok(OverlapPolicy::Queue),
            other => Err(format!(
                "unknown overlap policy '{}', expected 'supersede' or 'queue'",
                other
            )),
        }
    }
}

/// Shared cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Directory holding one SQLite store per cached resource.
    pub cache_dir: PathBuf,
    /// Rows returned per reader batch.
    pub reader_batch_size: usize,
    /// Maximum age of a persisted cache that may be reused.
    pub ttl: Duration,
    pub overlap_policy: OverlapPolicy,
    pub download: DownloadConfig,
}

/// Default cache directory (`<user cache dir>/wfscache`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("wfscache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            reader_batch_size: DEFAULT_READER_BATCH_SIZE,
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            overlap_policy: OverlapPolicy::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_reader_batch_size(mut self, size: usize) -> Self {
        self.reader_batch_size = size.max(1);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn with_download(mut self, download: DownloadConfig) -> Self {
        self.download = download;
        self
    }
}

impl From<&crate::config::ConfigFile> for CacheConfig {
    fn from(file: &crate::config::ConfigFile) -> Self {
        Self {
            cache_dir: file.cache.directory.clone(),
            reader_batch_size: file.cache.batch_size.max(1),
            ttl: Duration::from_secs(file.cache.ttl_days * 24 * 60 * 60),
            overlap_policy: file.cache.overlap_policy,
            download: DownloadConfig::from(&file.download),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.reader_batch_size, 500);
        assert_eq!(config.ttl, Duration::from_secs(604_800));
        assert_eq!(config.overlap_policy, OverlapPolicy::Supersede);
        assert!(config.cache_dir.ends_with("wfscache"));
    }

    #[test]
    fn test_overlap_policy_parse() {
        assert_eq!("Queue".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Queue));
        assert_eq!(
            " supersede ".parse::<OverlapPolicy>(),
            Ok(OverlapPolicy::Supersede)
        );
        assert!("both".parse::<OverlapPolicy>().is_err());
        assert_eq!(OverlapPolicy::Queue.to_string(), "queue");
    }

    #[test]
    fn test_batch_size_floor() {
        let config = CacheConfig::default().with_reader_batch_size(0);
        assert_eq!(config.reader_batch_size, 1);
    }
}
