//! Feature readers.
//!
//! A [`FeatureReader`] registers an extent with the shared cache, then
//! drains rows from the store in `(generation, local id)` order:
//!
//! 1. rows up to the generation snapshot taken at registration;
//! 2. rows serialized by the run it attached to, as the counter advances;
//! 3. after the run terminates, whatever is left up to the final counter.
//!
//! The reader never holds a coordinator lock while querying; it waits for
//! new rows on the cache's progress channel.

use std::sync::atomic::Ordering;

use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::coordinator::{Progress, Registration, SharedCache};
use crate::download::{RunId, RunStatus};
use crate::feature::{CachedFeature, Extent, Generation};
use crate::source::FeatureSource;
use crate::store::{RowCursor, RowQuery, StoreError};

/// Errors surfaced while draining a reader.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The run delivering this extent failed; rows returned before this
    /// error are valid but incomplete.
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Download cancelled")]
    DownloadCancelled,

    /// The cache was invalidated. The next call restarts from the new,
    /// empty state.
    #[error("Cache invalidated, reader restarts")]
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Draining,
    Restart,
    Finished,
}

/// Lazy sequence of cached rows for one extent.
pub struct FeatureReader<S: FeatureSource> {
    cache: SharedCache<S>,
    extent: Extent,
    registration: Registration,
    /// Run being followed; moves along supersessions.
    run: Option<RunId>,
    cursor: RowCursor,
    /// Current drain bound.
    upper: Generation,
    progress: watch::Receiver<Progress>,
    batch_size: usize,
    phase: Phase,
}

impl<S: FeatureSource> SharedCache<S> {
    /// Register `extent` and return a reader draining it.
    pub fn reader(&self, extent: Extent) -> FeatureReader<S> {
        let progress = self.progress();
        let registration = self.register(extent);
        self.inner.live_readers.fetch_add(1, Ordering::Relaxed);
        debug!(
            extent = %extent,
            generation = registration.generation,
            run = ?registration.run,
            "Reader registered"
        );
        FeatureReader {
            cache: self.clone(),
            extent,
            registration,
            run: registration.run,
            cursor: RowCursor::default(),
            upper: registration.generation,
            progress,
            batch_size: self.inner.config.reader_batch_size,
            phase: Phase::Draining,
        }
    }
}

impl<S: FeatureSource> FeatureReader<S> {
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Registration of the current traversal.
    pub fn registration(&self) -> Registration {
        self.registration
    }

    /// Rows per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Next batch of rows, `Ok(None)` once the extent is fully drained.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<CachedFeature>>, ReadError> {
        loop {
            match self.phase {
                Phase::Finished => return Ok(None),
                Phase::Restart => self.restart(),
                Phase::Draining => {}
            }

            self.check_epoch()?;
            let rows = self.query().await?;
            self.check_epoch()?;
            if let Some(last) = rows.last() {
                self.cursor = RowCursor::of(last);
                return Ok(Some(rows));
            }

            // Drained up to `upper`. Read the run status before the counter:
            // once a run is terminal, all its rows are at or below it.
            self.progress.borrow_and_update();
            let status = self.run.and_then(|run| self.cache.run_status(run));
            let (generation, epoch) = self.cache.inner.snapshot();
            if epoch != self.registration.epoch {
                // Emptied or cancelled by an invalidation, not drained.
                self.phase = Phase::Restart;
                return Err(ReadError::Invalidated);
            }
            if generation > self.upper {
                self.upper = generation;
                continue;
            }

            match status {
                None | Some(RunStatus::Completed { .. }) => {
                    self.phase = Phase::Finished;
                    return Ok(None);
                }
                Some(RunStatus::Superseded(next)) => {
                    debug!(run_id = ?self.run, next_run = %next, "Following superseding run");
                    self.run = Some(next);
                }
                Some(RunStatus::Failed(reason)) => {
                    self.phase = Phase::Finished;
                    return Err(ReadError::DownloadFailed(reason));
                }
                Some(RunStatus::Cancelled) => {
                    self.phase = Phase::Finished;
                    return Err(ReadError::DownloadCancelled);
                }
                Some(RunStatus::Pending | RunStatus::Running) => {
                    if self.progress.changed().await.is_err() {
                        self.phase = Phase::Finished;
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Drain every remaining row.
    pub async fn read_all(&mut self) -> Result<Vec<CachedFeature>, ReadError> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }

    /// Take a new generation snapshot and continue draining.
    ///
    /// Rows serialized since the last registration are delivered; rows
    /// already returned are not returned again. If the cache was
    /// invalidated meanwhile, the traversal starts over.
    pub fn rewind(&mut self) {
        let registration = self.cache.inner.register(self.extent);
        if registration.epoch != self.registration.epoch {
            self.cursor = RowCursor::default();
            self.upper = registration.generation;
        } else {
            self.upper = self.upper.max(registration.generation);
        }
        self.registration = registration;
        self.run = registration.run;
        self.phase = Phase::Draining;
    }

    /// Unregister the reader.
    pub fn release(self) {}

    fn check_epoch(&mut self) -> Result<(), ReadError> {
        if self.progress.borrow().epoch != self.registration.epoch {
            self.phase = Phase::Restart;
            return Err(ReadError::Invalidated);
        }
        Ok(())
    }

    fn restart(&mut self) {
        let registration = self.cache.inner.register(self.extent);
        debug!(
            epoch = registration.epoch,
            generation = registration.generation,
            "Reader restarting after invalidation"
        );
        self.registration = registration;
        self.run = registration.run;
        self.cursor = RowCursor::default();
        self.upper = registration.generation;
        self.phase = Phase::Draining;
    }

    async fn query(&self) -> Result<Vec<CachedFeature>, ReadError> {
        let store = std::sync::Arc::clone(&self.cache.inner.store);
        let query = RowQuery {
            after: self.cursor,
            up_to: self.upper,
            extent: self.extent,
            limit: self.batch_size,
        };
        tokio::task::spawn_blocking(move || store.query(&query))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e.to_string())))?
            .map_err(ReadError::from)
    }
}

impl<S: FeatureSource> Drop for FeatureReader<S> {
    fn drop(&mut self) {
        self.cache
            .inner
            .live_readers
            .fetch_sub(1, Ordering::Relaxed);
    }
}
