//! The write path shared by download runs and insert mutations.

use std::collections::HashSet;

use tracing::trace;

use super::cache::CacheInner;
use super::state::SerializeReport;
use crate::download::RunSpec;
use crate::feature::SourceFeature;
use crate::source::FeatureSource;
use crate::store::{NewRow, StoreError};

impl<S: FeatureSource> CacheInner<S> {
    /// Persist the not-yet-cached subset of `features` under the next
    /// generation, then advance the counter.
    ///
    /// The caller holds `write_lock`. Batches of a run that is no longer
    /// active, or of an older epoch, are dropped and reported stale.
    pub(super) fn write_batch_locked(
        &self,
        origin: Option<&RunSpec>,
        features: Vec<SourceFeature>,
    ) -> Result<SerializeReport, StoreError> {
        let current = {
            let mut state = self.state.lock();
            if let Some(spec) = origin {
                if spec.epoch != state.epoch || !state.is_active(spec.id) {
                    return Ok(SerializeReport {
                        generation: state.generation,
                        stale: true,
                        ..Default::default()
                    });
                }
            }
            state.features_attempted += features.len() as u64;
            state.generation
        };

        let mut report = SerializeReport {
            generation: current,
            ..Default::default()
        };

        let mut seen = HashSet::with_capacity(features.len());
        let mut unique = Vec::with_capacity(features.len());
        for feature in features {
            if seen.insert(feature.stable_id.clone()) {
                unique.push(feature);
            } else {
                report.repeated_in_run += 1;
            }
        }

        let existing = {
            let ids: Vec<&str> = unique.iter().map(|f| f.stable_id.as_str()).collect();
            self.store.existing_stable_ids(&ids)?
        };

        // Rows written after the run started came from this run's own
        // earlier pages.
        let run_start = origin.map(|spec| spec.start_generation);
        let next = current + 1;
        let mut rows = Vec::with_capacity(unique.len());
        for feature in unique {
            match existing.get(&feature.stable_id) {
                Some(&written) if run_start.is_some_and(|start| written > start) => {
                    report.repeated_in_run += 1;
                }
                Some(_) => report.already_cached += 1,
                None => rows.push(NewRow {
                    generation: next,
                    stable_id: feature.stable_id,
                    geometry: feature.geometry,
                    attributes: feature.attributes,
                }),
            }
        }

        if rows.is_empty() {
            return Ok(report);
        }

        report.inserted = self.store.insert(&rows)?;
        self.state.lock().generation = next;
        report.generation = next;
        self.progress.send_modify(|p| p.generation = next);

        trace!(
            generation = next,
            rows = rows.len(),
            "Batch serialized"
        );
        Ok(report)
    }
}
