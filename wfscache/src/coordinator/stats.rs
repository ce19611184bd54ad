//! Cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use super::cache::SharedCache;
use crate::download::{RunEnd, RunOutcome};
use crate::feature::Generation;
use crate::source::FeatureSource;
use crate::store::StoreError;

/// Run lifecycle counters.
#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub runs_started: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_cancelled: AtomicU64,
}

impl RunCounters {
    pub fn record(&self, outcome: &RunOutcome) {
        let counter = match outcome.end {
            RunEnd::Completed => &self.runs_completed,
            RunEnd::Failed(_) => &self.runs_failed,
            RunEnd::Cancelled => &self.runs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of a shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatistics {
    pub generation: Generation,
    pub epoch: u64,
    /// Region records, in flight or complete.
    pub regions: usize,
    pub completed_regions: usize,
    /// Rows materialized in the store.
    pub rows: u64,
    /// Features offered to the write path, duplicates included.
    pub features_attempted: u64,
    pub feature_count: u64,
    pub count_exact: bool,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub live_readers: usize,
}

impl CacheStatistics {
    /// Runs that have not terminated yet.
    pub fn runs_in_progress(&self) -> u64 {
        self.runs_started
            .saturating_sub(self.runs_completed + self.runs_failed + self.runs_cancelled)
    }
}

impl<S: FeatureSource> SharedCache<S> {
    pub fn stats(&self) -> Result<CacheStatistics, StoreError> {
        let inner = &self.inner;
        let rows = inner.store.count()?;
        let state = inner.state.lock();
        Ok(CacheStatistics {
            generation: state.generation,
            epoch: state.epoch,
            regions: inner.regions.len(),
            completed_regions: inner.regions.completed().len(),
            rows,
            features_attempted: state.features_attempted,
            feature_count: state.feature_count,
            count_exact: state.count_exact,
            runs_started: inner.counters.runs_started.load(Ordering::Relaxed),
            runs_completed: inner.counters.runs_completed.load(Ordering::Relaxed),
            runs_failed: inner.counters.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: inner.counters.runs_cancelled.load(Ordering::Relaxed),
            live_readers: inner.live_readers.load(Ordering::Relaxed),
        })
    }
}
