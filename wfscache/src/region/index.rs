//! In-memory index of requested regions.
//!
//! # Thread Safety
//!
//! Records live in a `DashMap` (concurrent reads, per-shard write locks), so
//! consumers can ask "is this extent cached" without going through the
//! coordinator. Decisions that must be atomic with respect to other
//! registrations (check coverage, then insert an in-flight record) are
//! serialized by the coordinator's registration lock, not by the index.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::record::{RegionId, RegionRecord, RegionState};
use crate::download::RunId;
use crate::feature::Extent;

/// Result of a coverage lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// A completed, non-truncated region contains the extent.
    Cached(RegionId),
    /// A region being downloaded by the given run contains the extent.
    InFlight(RunId),
    /// No single region contains the extent.
    Uncovered,
}

/// In-memory index of region records.
pub struct RegionIndex {
    records: DashMap<RegionId, RegionRecord>,
    next_id: AtomicU64,
}

impl RegionIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    fn allocate_id(&self) -> RegionId {
        RegionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record an extent that the given run is about to download.
    pub fn insert_in_flight(&self, extent: Extent, run: RunId) -> RegionId {
        let id = self.allocate_id();
        self.records.insert(
            id,
            RegionRecord {
                id,
                extent,
                state: RegionState::InFlight(run),
            },
        );
        id
    }

    /// Record an extent known to be fully cached (e.g. reloaded from disk).
    pub fn restore(&self, extent: Extent) -> RegionId {
        let id = self.allocate_id();
        self.records.insert(
            id,
            RegionRecord {
                id,
                extent,
                state: RegionState::Complete { truncated: false },
            },
        );
        id
    }

    /// Mark an in-flight region as downloaded.
    ///
    /// Returns `false` if the record no longer exists (e.g. the index was
    /// cleared while the run was still going).
    pub fn complete(&self, id: RegionId, truncated: bool) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                record.state = RegionState::Complete { truncated };
                true
            }
            None => false,
        }
    }

    /// Replace the extent of a record (used when a queued request is widened).
    pub fn set_extent(&self, id: RegionId, extent: Extent) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                record.extent = extent;
                true
            }
            None => false,
        }
    }

    /// Reassign an in-flight record to another run.
    pub fn reassign(&self, id: RegionId, run: RunId) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) if record.in_flight_run().is_some() => {
                record.state = RegionState::InFlight(run);
                true
            }
            _ => false,
        }
    }

    /// Remove a record, returning it if it existed.
    pub fn remove(&self, id: RegionId) -> Option<RegionRecord> {
        self.records.remove(&id).map(|(_, record)| record)
    }

    /// Get a copy of a record.
    pub fn get(&self, id: RegionId) -> Option<RegionRecord> {
        self.records.get(&id).map(|entry| *entry.value())
    }

    /// Find whether `extent` is contained in a single recorded region.
    ///
    /// A completed region wins over an in-flight one. Truncated regions never
    /// cover anything.
    pub fn coverage(&self, extent: &Extent) -> Coverage {
        let mut in_flight: Option<(RegionId, RunId)> = None;
        let mut cached: Option<RegionId> = None;

        for entry in self.records.iter() {
            let record = entry.value();
            if !record.extent.contains(extent) {
                continue;
            }
            match record.state {
                RegionState::Complete { truncated: false } => {
                    // Lowest id for deterministic answers
                    if cached.map_or(true, |c| record.id < c) {
                        cached = Some(record.id);
                    }
                }
                RegionState::InFlight(run) => {
                    if in_flight.map_or(true, |(id, _)| record.id < id) {
                        in_flight = Some((record.id, run));
                    }
                }
                RegionState::Complete { truncated: true } => {}
            }
        }

        match (cached, in_flight) {
            (Some(id), _) => Coverage::Cached(id),
            (None, Some((_, run))) => Coverage::InFlight(run),
            (None, None) => Coverage::Uncovered,
        }
    }

    /// Returns true if `extent` is covered by a completed region.
    pub fn is_cached(&self, extent: &Extent) -> bool {
        matches!(self.coverage(extent), Coverage::Cached(_))
    }

    /// All records intersecting `extent`, ordered by id.
    pub fn intersecting(&self, extent: &Extent) -> Vec<RegionRecord> {
        let mut found: Vec<RegionRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().extent.intersects(extent))
            .map(|entry| *entry.value())
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    /// All completed, non-truncated records, ordered by id.
    pub fn completed(&self) -> Vec<RegionRecord> {
        let mut found: Vec<RegionRecord> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_complete())
            .map(|entry| *entry.value())
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record. Ids keep increasing afterwards.
    pub fn clear(&self) {
        self.records.clear();
    }
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square(x: f64, y: f64, size: f64) -> Extent {
        Extent::new(x, y, x + size, y + size)
    }

    // =========================================================================
    // Basic bookkeeping
    // =========================================================================

    #[test]
    fn test_new_empty() {
        let index = RegionIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.coverage(&square(0.0, 0.0, 1.0)), Coverage::Uncovered);
    }

    #[test]
    fn test_insert_in_flight_and_complete() {
        let index = RegionIndex::new();
        let id = index.insert_in_flight(square(0.0, 0.0, 10.0), RunId(1));

        assert_eq!(
            index.coverage(&square(1.0, 1.0, 1.0)),
            Coverage::InFlight(RunId(1))
        );

        assert!(index.complete(id, false));
        assert_eq!(index.coverage(&square(1.0, 1.0, 1.0)), Coverage::Cached(id));
    }

    #[test]
    fn test_complete_missing_record() {
        let index = RegionIndex::new();
        assert!(!index.complete(RegionId(42), false));
    }

    #[test]
    fn test_remove() {
        let index = RegionIndex::new();
        let id = index.insert_in_flight(square(0.0, 0.0, 10.0), RunId(1));
        let removed = index.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(index.remove(id).is_none());
        assert_eq!(index.coverage(&square(1.0, 1.0, 1.0)), Coverage::Uncovered);
    }

    #[test]
    fn test_ids_keep_increasing_after_clear() {
        let index = RegionIndex::new();
        let first = index.restore(square(0.0, 0.0, 1.0));
        index.clear();
        let second = index.restore(square(0.0, 0.0, 1.0));
        assert!(second > first);
        assert_eq!(index.len(), 1);
    }

    // =========================================================================
    // Coverage
    // =========================================================================

    #[test]
    fn test_truncated_region_does_not_cover() {
        let index = RegionIndex::new();
        let id = index.insert_in_flight(square(0.0, 0.0, 10.0), RunId(1));
        index.complete(id, true);
        assert_eq!(index.coverage(&square(1.0, 1.0, 1.0)), Coverage::Uncovered);
        assert!(index.completed().is_empty());
    }

    #[test]
    fn test_cached_wins_over_in_flight() {
        let index = RegionIndex::new();
        index.insert_in_flight(Extent::unbounded(), RunId(2));
        let cached = index.restore(square(0.0, 0.0, 10.0));
        assert_eq!(
            index.coverage(&square(1.0, 1.0, 1.0)),
            Coverage::Cached(cached)
        );
    }

    #[test]
    fn test_straddling_extent_is_uncovered() {
        let index = RegionIndex::new();
        index.restore(square(0.0, 0.0, 10.0));
        index.restore(square(10.0, 0.0, 10.0));
        assert_eq!(
            index.coverage(&Extent::new(5.0, 1.0, 15.0, 2.0)),
            Coverage::Uncovered
        );
    }

    #[test]
    fn test_unbounded_region_covers_everything() {
        let index = RegionIndex::new();
        let id = index.restore(Extent::unbounded());
        assert!(index.is_cached(&square(-1e6, -1e6, 5.0)));
        assert_eq!(index.coverage(&Extent::unbounded()), Coverage::Cached(id));
    }

    #[test]
    fn test_set_extent_and_reassign() {
        let index = RegionIndex::new();
        let id = index.insert_in_flight(square(0.0, 0.0, 1.0), RunId(1));
        assert!(index.set_extent(id, square(0.0, 0.0, 5.0)));
        assert!(index.reassign(id, RunId(2)));
        assert_eq!(
            index.coverage(&square(3.0, 3.0, 1.0)),
            Coverage::InFlight(RunId(2))
        );

        index.complete(id, false);
        assert!(!index.reassign(id, RunId(3)));
    }

    #[test]
    fn test_intersecting_sorted_by_id() {
        let index = RegionIndex::new();
        let a = index.restore(square(0.0, 0.0, 10.0));
        index.restore(square(100.0, 100.0, 1.0));
        let c = index.insert_in_flight(square(5.0, 5.0, 10.0), RunId(1));

        let found: Vec<RegionId> = index
            .intersecting(&square(6.0, 6.0, 1.0))
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found, vec![a, c]);
    }

    // =========================================================================
    // Thread safety
    // =========================================================================

    #[test]
    fn test_concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(RegionIndex::new());
        let mut handles = Vec::new();
        for t in 0..8 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    index.restore(square(t as f64 * 100.0, i as f64, 1.0));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.len(), 400);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    proptest! {
        /// Property: every sub-extent of a completed region is cached.
        #[test]
        fn prop_sub_extent_of_completed_region_is_cached(
            x in -100.0f64..100.0,
            y in -100.0f64..100.0,
            size in 1.0f64..50.0,
            fx in 0.0f64..1.0,
            fy in 0.0f64..1.0,
            fw in 0.0f64..1.0,
        ) {
            let index = RegionIndex::new();
            let id = index.insert_in_flight(square(x, y, size), RunId(1));
            index.complete(id, false);

            let sx = x + fx * size;
            let sy = y + fy * size;
            let inner_size = fw * 0.5 * (size - (sx - x)).min(size - (sy - y));
            prop_assert!(index.is_cached(&square(sx, sy, inner_size)));
        }

        /// Property: an extent reaching outside every region is never cached.
        #[test]
        fn prop_extent_outside_region_is_uncovered(
            x in -100.0f64..100.0,
            y in -100.0f64..100.0,
            size in 1.0f64..50.0,
            overshoot in 0.5f64..10.0,
        ) {
            let index = RegionIndex::new();
            let id = index.insert_in_flight(square(x, y, size), RunId(1));
            index.complete(id, false);

            let wider = square(x, y, size + overshoot);
            prop_assert_eq!(index.coverage(&wider), Coverage::Uncovered);
        }
    }
}
