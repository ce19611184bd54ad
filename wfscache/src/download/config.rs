//! Downloader configuration.

use std::time::Duration;

/// Default retry attempts per page after the first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay of the exponential retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Configuration for downloader runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadConfig {
    /// Retries of a page after a transient error.
    ///
    /// Default: 3 (so at most 4 attempts per page)
    pub max_retries: u32,

    /// Base delay of the backoff; attempt `n` waits `base * 2^n`.
    ///
    /// Default: 100 ms
    pub retry_base_delay: Duration,

    /// Client-side cap on features per run. `None` means no cap.
    pub max_features: Option<u64>,

    /// Features requested per page. `None` leaves the page size to the source.
    pub page_size: Option<u64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_features: None,
            page_size: None,
        }
    }
}

impl DownloadConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Cap the number of features downloaded per run.
    pub fn with_max_features(mut self, max_features: u64) -> Self {
        self.max_features = Some(max_features);
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(16)))
    }

    /// Features to request next, given how many the run already holds.
    pub(crate) fn page_limit(&self, delivered: u64) -> Option<u64> {
        let remaining = self.max_features.map(|cap| cap.saturating_sub(delivered));
        match (self.page_size, remaining) {
            (Some(size), Some(rem)) => Some(size.min(rem)),
            (size, rem) => size.or(rem),
        }
    }
}

impl From<&crate::config::DownloadSettings> for DownloadConfig {
    fn from(settings: &crate::config::DownloadSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_features: settings.max_features,
            page_size: settings.page_size,
        }
    }
}
