//! Session state and the values exchanged with readers and the downloader.

use tokio_util::sync::CancellationToken;

use crate::download::RunId;
use crate::feature::{Extent, Generation, LocalId, INITIAL_GENERATION};
use crate::region::RegionId;

/// The run currently fetching pages.
#[derive(Debug)]
pub(crate) struct ActiveRun {
    pub id: RunId,
    pub region: RegionId,
    pub extent: Extent,
    pub cancel: CancellationToken,
}

/// A run waiting for the active one to finish (queue policy).
#[derive(Debug)]
pub(crate) struct QueuedRun {
    pub id: RunId,
    pub region: RegionId,
    pub extent: Extent,
}

/// Mutable bookkeeping guarded by the coordinator's state lock.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub generation: Generation,
    /// Bumped by every invalidation.
    pub epoch: u64,
    /// Effective remote filter expression.
    pub filter: Option<String>,
    pub feature_count: u64,
    pub count_exact: bool,
    /// Features offered to `serialize`, duplicates included.
    pub features_attempted: u64,
    pub active: Option<ActiveRun>,
    pub queued: Option<QueuedRun>,
}

impl SessionState {
    pub fn new(generation: Generation, filter: Option<String>) -> Self {
        Self {
            generation,
            epoch: 0,
            filter,
            feature_count: 0,
            count_exact: false,
            features_attempted: 0,
            active: None,
            queued: None,
        }
    }

    pub fn is_active(&self, run: RunId) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == run)
    }

    /// Forget everything tied to the cached rows.
    pub fn reset(&mut self) {
        self.generation = INITIAL_GENERATION;
        self.epoch += 1;
        self.feature_count = 0;
        self.count_exact = false;
        self.active = None;
        self.queued = None;
    }
}

/// Snapshot published to readers on every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub epoch: u64,
    pub generation: Generation,
    /// Number of run terminations and supersessions seen so far.
    pub run_events: u64,
}

/// Result of registering an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Run that will download the extent; `None` if already cached.
    pub run: Option<RunId>,
    /// Generation counter at registration time.
    pub generation: Generation,
    pub epoch: u64,
}

/// Outcome of writing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializeReport {
    /// Generation counter after the write.
    pub generation: Generation,
    /// Local ids of the rows written, in batch order.
    pub inserted: Vec<LocalId>,
    /// Features already cached before the run started.
    pub already_cached: usize,
    /// Features seen earlier in the same run or batch.
    pub repeated_in_run: usize,
    /// The batch belonged to a cancelled run or an older epoch and was
    /// dropped.
    pub stale: bool,
}

impl SerializeReport {
    /// Distinct features the batch contributed to its run.
    pub fn delivered(&self) -> u64 {
        (self.inserted.len() + self.already_cached) as u64
    }
}

/// Feature count estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureCount {
    pub value: u64,
    pub exact: bool,
}
