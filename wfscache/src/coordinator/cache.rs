//! Shared cache construction, registration and run bookkeeping.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{CacheConfig, OverlapPolicy};
use super::error::CoordinatorError;
use super::state::{
    ActiveRun, Progress, QueuedRun, Registration, SerializeReport, SessionState,
};
use super::stats::RunCounters;
use crate::count::CountEstimator;
use crate::download::{
    execute_run, DownloadConfig, RunId, RunOutcome, RunSink, RunSpec, RunStatus, SourceLimits,
};
use crate::feature::{Extent, Generation, SourceFeature, INITIAL_GENERATION};
use crate::region::{Coverage, RegionId, RegionIndex};
use crate::source::{DataSourceUri, FeatureSource, SourceCapabilities};
use crate::store::{
    schema_fingerprint, FeatureStore, ResumeState, SqliteFeatureStore, StoreDescriptor, StoreError,
};

/// Coordinator state shared by the cache handle, readers and runs.
pub(crate) struct CacheInner<S: FeatureSource> {
    pub(super) this: Weak<CacheInner<S>>,
    pub(super) uri: DataSourceUri,
    pub(super) source: Arc<S>,
    pub(crate) store: Arc<dyn FeatureStore>,
    pub(crate) config: CacheConfig,
    pub(super) download: DownloadConfig,
    pub(super) capabilities: SourceCapabilities,
    pub(crate) regions: RegionIndex,
    /// Region and generation bookkeeping.
    pub(super) state: Mutex<SessionState>,
    /// Serializes run start/stop decisions. Taken before `write_lock`.
    pub(super) register_lock: Mutex<()>,
    /// Serializes every store write. Taken before `state`.
    pub(super) write_lock: Mutex<()>,
    pub(super) progress: watch::Sender<Progress>,
    pub(super) runs: DashMap<RunId, RunStatus>,
    pub(super) estimator: CountEstimator<S>,
    pub(super) counters: RunCounters,
    pub(crate) live_readers: AtomicUsize,
    next_run: AtomicU64,
    runtime: Handle,
    shutdown: CancellationToken,
}

/// Cache and sync layer in front of one remote feature type.
///
/// Cloning is cheap; all clones share the same state. Any number of
/// readers may run concurrently with the single background download run.
///
/// # Lock order
///
/// `register_lock` → `write_lock` → `state`. No lock is held across
/// network I/O.
pub struct SharedCache<S: FeatureSource> {
    pub(crate) inner: Arc<CacheInner<S>>,
}

impl<S: FeatureSource> Clone for SharedCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn store_descriptor(
    uri: &DataSourceUri,
    filter: Option<String>,
    capabilities: &SourceCapabilities,
    ttl: Duration,
) -> StoreDescriptor {
    let mut keyed = uri.clone();
    keyed.filter = filter;
    StoreDescriptor {
        cache_key: keyed.cache_key(),
        schema_fingerprint: schema_fingerprint(
            &capabilities.fields,
            &capabilities.geometry_attribute,
        ),
        ttl: Some(ttl),
    }
}

impl<S: FeatureSource> SharedCache<S> {
    /// Open a cache over `store`, describing the layer through `source`.
    ///
    /// A store holding a still-valid cache of the same resource is reused:
    /// the generation counter resumes after its newest rows and its
    /// completed regions are restored. Must be called within a Tokio
    /// runtime, which then drives the download runs.
    pub async fn open(
        config: CacheConfig,
        uri: DataSourceUri,
        source: S,
        store: Arc<dyn FeatureStore>,
    ) -> Result<Self, CoordinatorError> {
        let source = Arc::new(source);
        let capabilities = source.describe().await?;
        let filter = uri.compute_filter();
        let descriptor = store_descriptor(&uri, filter.clone(), &capabilities, config.ttl);

        let regions = RegionIndex::new();
        let mut state = SessionState::new(INITIAL_GENERATION, filter);
        match store.open_session(&descriptor)? {
            ResumeState::Fresh => {
                debug!(cache_key = %descriptor.cache_key, "Starting with an empty cache");
            }
            ResumeState::Reused {
                max_generation,
                regions: saved,
                rows,
            } => {
                for extent in &saved {
                    regions.restore(*extent);
                }
                state.generation = max_generation;
                let whole_layer = saved
                    .iter()
                    .any(|e| covers_layer(e, capabilities.layer_extent.as_ref()));
                if whole_layer {
                    state.feature_count = rows;
                    state.count_exact = true;
                }
                info!(
                    cache_key = %descriptor.cache_key,
                    generation = max_generation,
                    rows = rows,
                    regions = saved.len(),
                    "Resumed persisted cache"
                );
            }
        }

        let mut download = config.download.clone();
        if let Some(max) = uri.max_features {
            download.max_features = Some(download.max_features.map_or(max, |cap| cap.min(max)));
        }

        let (progress, _) = watch::channel(Progress {
            epoch: state.epoch,
            generation: state.generation,
            run_events: 0,
        });
        let estimator = CountEstimator::new(Arc::clone(&source), capabilities.supports_hits);

        info!(
            type_name = %uri.type_name,
            version = %capabilities.version,
            fields = capabilities.fields.len(),
            paging = capabilities.supports_paging,
            "Shared cache opened"
        );

        let inner = Arc::new_cyclic(|this| CacheInner {
            this: this.clone(),
            uri,
            source,
            store,
            config,
            download,
            capabilities,
            regions,
            state: Mutex::new(state),
            register_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            progress,
            runs: DashMap::new(),
            estimator,
            counters: RunCounters::default(),
            live_readers: AtomicUsize::new(0),
            next_run: AtomicU64::new(1),
            runtime: Handle::current(),
            shutdown: CancellationToken::new(),
        });
        Ok(Self { inner })
    }

    /// Open a cache backed by `<cache_dir>/<cache_key>.sqlite`.
    pub async fn open_on_disk(
        config: CacheConfig,
        uri: DataSourceUri,
        source: S,
    ) -> Result<Self, CoordinatorError> {
        let path = config.cache_dir.join(format!("{}.sqlite", uri.cache_key()));
        let store = SqliteFeatureStore::open(&path)?;
        Self::open(config, uri, source, Arc::new(store)).await
    }

    pub fn uri(&self) -> &DataSourceUri {
        &self.inner.uri
    }

    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    pub fn capabilities(&self) -> &SourceCapabilities {
        &self.inner.capabilities
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Register interest in `extent`.
    ///
    /// Returns immediately with the run that will deliver the extent (if
    /// any) and the generation snapshot to drain up to. Never blocks on
    /// the download itself.
    pub fn register(&self, extent: Extent) -> Registration {
        self.inner.register(extent)
    }

    /// Latest value of the generation counter.
    pub fn current_generation(&self) -> Generation {
        self.inner.state.lock().generation
    }

    /// Current epoch; bumped by every invalidation.
    pub fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    pub fn run_status(&self, run: RunId) -> Option<RunStatus> {
        self.inner.run_status(run)
    }

    /// Subscribe to generation, epoch and run changes.
    pub fn progress(&self) -> watch::Receiver<Progress> {
        self.inner.progress.subscribe()
    }

    /// Wait until `run` (or the run that superseded it) terminates.
    ///
    /// Returns `None` for an unknown run.
    pub async fn wait_for_run(&self, run: RunId) -> Option<RunStatus> {
        let mut progress = self.progress();
        let mut run = run;
        loop {
            progress.borrow_and_update();
            match self.inner.run_status(run) {
                None => return None,
                Some(RunStatus::Superseded(next)) => {
                    run = next;
                    continue;
                }
                Some(status) if status.is_terminal() => return Some(status),
                Some(_) => {}
            }
            if progress.changed().await.is_err() {
                return self.inner.run_status(run);
            }
        }
    }

    /// Write a batch of features outside of any run.
    pub fn serialize(&self, features: Vec<SourceFeature>) -> Result<SerializeReport, StoreError> {
        let _write = self.inner.write_lock.lock();
        self.inner.write_batch_locked(None, features)
    }

    /// Drop every cached row and region and restart from generation zero.
    ///
    /// The active run is cancelled. Readers observe the new epoch and
    /// restart from an empty cache.
    pub fn invalidate(&self) -> Result<(), StoreError> {
        self.inner.invalidate()
    }

    /// Change the remote filter. This changes what the cache holds, so the
    /// cache is invalidated.
    pub fn set_filter(&self, filter: Option<String>) -> Result<(), StoreError> {
        let inner = &self.inner;
        {
            let _register = inner.register_lock.lock();
            let mut state = inner.state.lock();
            if state.filter == filter {
                return Ok(());
            }
            state.filter = filter.clone();
        }
        inner.invalidate()?;
        let descriptor = store_descriptor(
            &inner.uri,
            filter,
            &inner.capabilities,
            inner.config.ttl,
        );
        let _write = inner.write_lock.lock();
        inner.store.open_session(&descriptor)?;
        info!(cache_key = %descriptor.cache_key, "Filter changed, cache invalidated");
        Ok(())
    }

    /// Cancel the active run and any queued run.
    ///
    /// Returns false if nothing was running.
    pub fn cancel_download(&self) -> bool {
        let inner = &self.inner;
        let _register = inner.register_lock.lock();
        let mut state = inner.state.lock();
        let mut cancelled = false;
        if let Some(queued) = state.queued.take() {
            inner.regions.remove(queued.region);
            inner.runs.insert(queued.id, RunStatus::Cancelled);
            inner.counters.runs_cancelled.fetch_add(1, Ordering::Relaxed);
            cancelled = true;
        }
        if let Some(active) = &state.active {
            info!(run_id = %active.id, "Cancelling download run");
            active.cancel.cancel();
            cancelled = true;
        }
        drop(state);
        inner.publish_run_event();
        cancelled
    }

    /// Cancel all runs for good. Registrations afterwards start runs that
    /// end immediately as cancelled.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// True if a download of `extent` fetched the whole layer.
fn covers_layer(extent: &Extent, layer_extent: Option<&Extent>) -> bool {
    extent.is_unbounded() || layer_extent.is_some_and(|layer| extent.contains(layer))
}

impl<S: FeatureSource> CacheInner<S> {
    pub(crate) fn run_status(&self, run: RunId) -> Option<RunStatus> {
        self.runs.get(&run).map(|status| status.value().clone())
    }

    pub(crate) fn register(&self, extent: Extent) -> Registration {
        let _register = self.register_lock.lock();
        let mut state = self.state.lock();

        let run = match self.regions.coverage(&extent) {
            Coverage::Cached(region) => {
                debug!(extent = %extent, region = %region, "Extent already cached");
                None
            }
            Coverage::InFlight(run) => {
                debug!(extent = %extent, run_id = %run, "Attaching to in-flight run");
                Some(run)
            }
            Coverage::Uncovered => Some(self.schedule(&mut state, extent)),
        };

        Registration {
            run,
            generation: state.generation,
            epoch: state.epoch,
        }
    }

    /// Decide how an uncovered extent gets downloaded.
    fn schedule(&self, state: &mut SessionState, extent: Extent) -> RunId {
        let Some(active) = state.active.take() else {
            let id = self.allocate_run_id();
            let region = self.regions.insert_in_flight(extent, id);
            self.start_run(state, id, region, extent);
            return id;
        };

        match self.config.overlap_policy {
            OverlapPolicy::Supersede => {
                let union = active.extent.union(&extent);
                let id = self.allocate_run_id();
                active.cancel.cancel();
                self.runs.insert(active.id, RunStatus::Superseded(id));
                self.regions.set_extent(active.region, union);
                self.regions.reassign(active.region, id);
                info!(
                    run_id = %active.id,
                    next_run = %id,
                    extent = %union,
                    "Superseding download run with wider extent"
                );
                self.start_run(state, id, active.region, union);
                self.publish_run_event();
                id
            }
            OverlapPolicy::Queue => {
                state.active = Some(active);
                match &mut state.queued {
                    Some(queued) => {
                        queued.extent = queued.extent.union(&extent);
                        self.regions.set_extent(queued.region, queued.extent);
                        debug!(run_id = %queued.id, extent = %queued.extent, "Widened queued run");
                        queued.id
                    }
                    None => {
                        let id = self.allocate_run_id();
                        let region = self.regions.insert_in_flight(extent, id);
                        self.runs.insert(id, RunStatus::Pending);
                        state.queued = Some(QueuedRun { id, region, extent });
                        debug!(run_id = %id, extent = %extent, "Queued download run");
                        id
                    }
                }
            }
        }
    }

    fn allocate_run_id(&self) -> RunId {
        RunId(self.next_run.fetch_add(1, Ordering::Relaxed))
    }

    /// Spawn the run task and make it the active run.
    fn start_run(&self, state: &mut SessionState, id: RunId, region: RegionId, extent: Extent) {
        let Some(sink) = self.this.upgrade() else {
            return;
        };
        let cancel = self.shutdown.child_token();
        let spec = RunSpec {
            id,
            extent,
            filter: state.filter.clone(),
            epoch: state.epoch,
            start_generation: state.generation,
        };
        state.active = Some(ActiveRun {
            id,
            region,
            extent,
            cancel: cancel.clone(),
        });
        self.runs.insert(id, RunStatus::Running);
        self.counters.runs_started.fetch_add(1, Ordering::Relaxed);
        self.runtime.spawn(execute_run(
            Arc::clone(&self.source),
            sink,
            self.download.clone(),
            SourceLimits::from(&self.capabilities),
            spec,
            cancel,
        ));
    }

    pub(super) fn publish_run_event(&self) {
        self.progress.send_modify(|p| p.run_events += 1);
    }

    pub(super) fn invalidate(&self) -> Result<(), StoreError> {
        let _register = self.register_lock.lock();
        let _write = self.write_lock.lock();
        let mut state = self.state.lock();

        if let Some(active) = &state.active {
            active.cancel.cancel();
            self.runs.insert(active.id, RunStatus::Cancelled);
        }
        if let Some(queued) = &state.queued {
            self.runs.insert(queued.id, RunStatus::Cancelled);
            self.counters.runs_cancelled.fetch_add(1, Ordering::Relaxed);
        }
        state.reset();
        self.regions.clear();

        // Readers must see the new epoch before any row disappears, or an
        // emptied store would look like a finished extent.
        let (epoch, generation) = (state.epoch, state.generation);
        self.progress.send_modify(|p| {
            p.epoch = epoch;
            p.generation = generation;
            p.run_events += 1;
        });
        let cleared = self.store.clear();
        drop(state);
        info!(epoch = epoch, "Cache invalidated");
        cleared
    }

    /// Generation and epoch read under one lock.
    pub(crate) fn snapshot(&self) -> (Generation, u64) {
        let state = self.state.lock();
        (state.generation, state.epoch)
    }

    /// Terminal bookkeeping of a run.
    fn finish_run(&self, run: RunId, outcome: RunOutcome) {
        let _register = self.register_lock.lock();
        let _write = self.write_lock.lock();
        let mut state = self.state.lock();
        self.counters.record(&outcome);

        if !state.is_active(run) {
            // Superseded, or cancelled by invalidation: status already final.
            let mut status = self.runs.entry(run).or_insert(RunStatus::Cancelled);
            if !status.is_terminal() {
                *status = outcome.status();
            }
            drop(status);
            drop(state);
            self.publish_run_event();
            return;
        }

        let Some(active) = state.active.take() else {
            return;
        };

        if outcome.success() {
            self.regions.complete(active.region, outcome.truncated);
            if !outcome.truncated {
                if let Err(e) = self.store.save_region(&active.extent) {
                    warn!(run_id = %run, error = %e, "Failed to persist cached region");
                }
                if covers_layer(&active.extent, self.capabilities.layer_extent.as_ref()) {
                    state.feature_count = outcome.feature_count;
                    state.count_exact = true;
                    info!(count = outcome.feature_count, "Exact feature count established");
                }
            }
        } else {
            // A failed region must not vouch for coverage.
            self.regions.remove(active.region);
        }
        // Readers see the terminal status only once the region is settled.
        self.runs.insert(run, outcome.status());

        if let Some(queued) = state.queued.take() {
            self.start_run(&mut state, queued.id, queued.region, queued.extent);
        }
        drop(state);
        self.publish_run_event();
    }
}

impl<S: FeatureSource> RunSink for CacheInner<S> {
    fn serialize_batch(
        &self,
        spec: &RunSpec,
        features: Vec<SourceFeature>,
    ) -> Result<SerializeReport, StoreError> {
        let _write = self.write_lock.lock();
        self.write_batch_locked(Some(spec), features)
    }

    fn end_of_download(&self, run: RunId, outcome: RunOutcome) {
        self.finish_run(run, outcome);
    }
}
