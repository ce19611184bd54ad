//! Count estimator: one-shot wrapper around count-only requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::source::{CountResponse, FeatureSource, SourceError};

/// Issues count-only requests and remembers when the server cannot answer
/// them.
///
/// Outcomes of [`get_count`](Self::get_count):
/// - `Ok(Some(n))`: exact count from the server
/// - `Ok(None)`: counting is unsupported for this session; no request is
///   issued again
/// - `Err(_)`: transport or parse failure; the caller may retry later
pub struct CountEstimator<S: FeatureSource> {
    source: Arc<S>,
    supported: AtomicBool,
}

impl<S: FeatureSource> CountEstimator<S> {
    /// Create an estimator. `supported` is the server's advertised hits
    /// support.
    pub fn new(source: Arc<S>, supported: bool) -> Self {
        Self {
            source,
            supported: AtomicBool::new(supported),
        }
    }

    /// Returns false once the server has declared counting unsupported.
    pub fn is_supported(&self) -> bool {
        self.supported.load(Ordering::Acquire)
    }

    pub async fn get_count(&self, filter: Option<&str>) -> Result<Option<u64>, SourceError> {
        if !self.is_supported() {
            return Ok(None);
        }
        match self.source.fetch_count(filter).await? {
            CountResponse::Exact(count) => {
                debug!(count = count, "Server returned exact feature count");
                Ok(Some(count))
            }
            CountResponse::Unsupported => {
                info!("Server does not support count requests, falling back to local count");
                self.supported.store(false, Ordering::Release);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::test_support::{CountMode, ScriptedSource};

    #[tokio::test]
    async fn test_exact_count() {
        let source = Arc::new(ScriptedSource::with_grid(12));
        let estimator = CountEstimator::new(Arc::clone(&source), true);
        assert_eq!(estimator.get_count(None).await.unwrap(), Some(12));
        assert!(estimator.is_supported());
    }

    #[tokio::test]
    async fn test_unsupported_is_permanent() {
        let source = Arc::new(ScriptedSource::with_grid(12).with_count_mode(CountMode::Unsupported));
        let estimator = CountEstimator::new(Arc::clone(&source), true);

        assert_eq!(estimator.get_count(None).await.unwrap(), None);
        assert_eq!(estimator.get_count(None).await.unwrap(), None);
        assert_eq!(source.count_fetches(), 1);
        assert!(!estimator.is_supported());
    }

    #[tokio::test]
    async fn test_error_leaves_support_flag() {
        let source = Arc::new(ScriptedSource::with_grid(12).with_count_mode(CountMode::Error));
        let estimator = CountEstimator::new(Arc::clone(&source), true);

        assert!(estimator.get_count(None).await.is_err());
        assert!(estimator.get_count(None).await.is_err());
        assert_eq!(source.count_fetches(), 2);
        assert!(estimator.is_supported());
    }

    #[tokio::test]
    async fn test_not_advertised_skips_request() {
        let source = Arc::new(ScriptedSource::with_grid(12));
        let estimator = CountEstimator::new(Arc::clone(&source), false);
        assert_eq!(estimator.get_count(None).await.unwrap(), None);
        assert_eq!(source.count_fetches(), 0);
    }
}
