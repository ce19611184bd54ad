//! WFS-T style mutations of cached features.
//!
//! Every mutation resolves local ids to stable ids first and fails without
//! touching the store if any id is unknown. Each call is one atomic store
//! write. None of them moves the
//! generation counter, except inserts, which go through the write path.

use std::collections::{BTreeMap, HashSet};

use tracing::info;

use super::cache::SharedCache;
use super::error::MutationError;
use crate::feature::{Field, FieldKind, FieldValue, Geometry, LocalId, SourceFeature};
use crate::source::FeatureSource;
use crate::store::StoreError;

fn check_value(fields: &[Field], index: usize, value: &FieldValue) -> Result<(), MutationError> {
    let field = fields.get(index).ok_or_else(|| MutationError::InvalidField {
        index,
        reason: format!("layer has {} fields", fields.len()),
    })?;
    match (field.kind, value.kind()) {
        (_, None) => Ok(()),
        (expected, Some(actual)) if expected == actual => Ok(()),
        (FieldKind::Double, Some(FieldKind::Integer)) => Ok(()),
        (expected, Some(actual)) => Err(MutationError::InvalidField {
            index,
            reason: format!("field '{}' is {}, got {}", field.name, expected, actual),
        }),
    }
}

impl<S: FeatureSource> SharedCache<S> {
    /// Stable id of the cached feature with this local id.
    pub fn find_stable_id(&self, local_id: LocalId) -> Result<Option<String>, StoreError> {
        self.inner.store.stable_id(local_id)
    }

    fn resolve_locked(&self, ids: &[LocalId]) -> Result<Vec<String>, MutationError> {
        ids.iter()
            .map(|id| {
                self.inner
                    .store
                    .stable_id(*id)?
                    .ok_or(MutationError::NotFound(*id))
            })
            .collect()
    }

    /// Delete features. Returns the number of rows removed.
    pub fn delete_features(&self, ids: &[LocalId]) -> Result<usize, MutationError> {
        let _write = self.inner.write_lock.lock();
        let stable_ids = self.resolve_locked(ids)?;
        let removed = self.inner.store.delete(&stable_ids)?;
        info!(requested = ids.len(), removed = removed, "Deleted cached features");
        Ok(removed)
    }

    /// Replace geometries. `None` clears a feature's geometry.
    pub fn change_geometry(
        &self,
        changes: &BTreeMap<LocalId, Option<Geometry>>,
    ) -> Result<(), MutationError> {
        let _write = self.inner.write_lock.lock();
        let ids: Vec<LocalId> = changes.keys().copied().collect();
        let stable_ids = self.resolve_locked(&ids)?;
        let batch: Vec<(&str, Option<&Geometry>)> = stable_ids
            .iter()
            .zip(changes.values())
            .map(|(stable_id, geometry)| (stable_id.as_str(), geometry.as_ref()))
            .collect();
        self.inner.store.update_geometries(&batch)?;
        info!(features = changes.len(), "Changed cached geometries");
        Ok(())
    }

    /// Overwrite attribute values, keyed by local id then field index.
    pub fn change_attributes(
        &self,
        changes: &BTreeMap<LocalId, BTreeMap<usize, FieldValue>>,
    ) -> Result<(), MutationError> {
        let fields = &self.inner.capabilities.fields;
        for values in changes.values() {
            for (index, value) in values {
                check_value(fields, *index, value)?;
            }
        }

        let _write = self.inner.write_lock.lock();
        let ids: Vec<LocalId> = changes.keys().copied().collect();
        let stable_ids = self.resolve_locked(&ids)?;
        let batch: Vec<(&str, &BTreeMap<usize, FieldValue>)> = stable_ids
            .iter()
            .map(String::as_str)
            .zip(changes.values())
            .collect();
        self.inner.store.update_attributes(&batch)?;
        info!(features = changes.len(), "Changed cached attributes");
        Ok(())
    }

    /// Insert new features, returning their local ids.
    ///
    /// The batch goes through the write path and advances the generation
    /// counter. Stable ids must be new.
    pub fn insert_features(
        &self,
        features: Vec<SourceFeature>,
    ) -> Result<Vec<LocalId>, MutationError> {
        if features.is_empty() {
            return Ok(Vec::new());
        }
        for feature in &features {
            for (index, value) in feature.attributes.iter().enumerate() {
                check_value(&self.inner.capabilities.fields, index, value)?;
            }
        }

        let _write = self.inner.write_lock.lock();
        let mut seen = HashSet::new();
        if let Some(dup) = features.iter().find(|f| !seen.insert(f.stable_id.as_str())) {
            return Err(MutationError::AlreadyExists(dup.stable_id.clone()));
        }
        let ids: Vec<&str> = features.iter().map(|f| f.stable_id.as_str()).collect();
        if let Some(existing) = self.inner.store.existing_stable_ids(&ids)?.into_keys().next() {
            return Err(MutationError::AlreadyExists(existing));
        }

        let report = self.inner.write_batch_locked(None, features)?;
        info!(
            inserted = report.inserted.len(),
            generation = report.generation,
            "Inserted features"
        );
        Ok(report.inserted)
    }
}
