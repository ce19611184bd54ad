//! Feature count estimation with local fallback.

use tracing::{debug, warn};

use super::cache::SharedCache;
use super::state::FeatureCount;
use crate::source::FeatureSource;
use crate::store::StoreError;

impl<S: FeatureSource> SharedCache<S> {
    /// Best current estimate of the number of features in the layer.
    ///
    /// An exact count is returned when one is known. Otherwise, with
    /// `issue_request_if_needed`, the server is asked for a count; when it
    /// cannot answer (unsupported or failed) the materialized row count is
    /// returned, flagged inexact.
    pub async fn get_feature_count(
        &self,
        issue_request_if_needed: bool,
    ) -> Result<FeatureCount, StoreError> {
        let inner = &self.inner;
        let (epoch, filter) = {
            let state = inner.state.lock();
            if state.count_exact {
                return Ok(FeatureCount {
                    value: state.feature_count,
                    exact: true,
                });
            }
            (state.epoch, state.filter.clone())
        };

        if issue_request_if_needed {
            match inner.estimator.get_count(filter.as_deref()).await {
                Ok(Some(count)) => {
                    let mut state = inner.state.lock();
                    // Ignore the answer if the cache was invalidated meanwhile.
                    if state.epoch == epoch && state.filter == filter {
                        state.feature_count = count;
                        state.count_exact = true;
                    }
                    return Ok(FeatureCount {
                        value: count,
                        exact: true,
                    });
                }
                Ok(None) => debug!("Count unsupported, using materialized rows"),
                Err(e) => warn!(error = %e, "Count request failed, using materialized rows"),
            }
        }

        Ok(FeatureCount {
            value: inner.store.count()?,
            exact: false,
        })
    }

    /// Force an exact feature count.
    pub fn set_feature_count(&self, count: u64) {
        let mut state = self.inner.state.lock();
        state.feature_count = count;
        state.count_exact = true;
    }
}
