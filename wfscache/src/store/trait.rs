//! Feature store trait.

use std::collections::{BTreeMap, HashMap};

use super::types::{NewRow, ResumeState, RowQuery, StoreDescriptor, StoreError};
use crate::feature::{CachedFeature, Extent, FieldValue, Generation, Geometry, LocalId};

/// Durable storage for cached feature rows.
///
/// Methods are blocking. The coordinator serializes all mutating calls
/// behind its write lock; `query`, `count` and `stable_id` may run
/// concurrently with a writer.
pub trait FeatureStore: Send + Sync + 'static {
    /// Validate the stored cache against `descriptor`, resetting the store
    /// when it cannot be reused.
    fn open_session(&self, descriptor: &StoreDescriptor) -> Result<ResumeState, StoreError>;

    /// Insert rows, returning their local ids in order.
    fn insert(&self, rows: &[NewRow]) -> Result<Vec<LocalId>, StoreError>;

    /// Generation of each of `stable_ids` already stored. Absent ids are
    /// missing from the map.
    fn existing_stable_ids(
        &self,
        stable_ids: &[&str],
    ) -> Result<HashMap<String, Generation>, StoreError>;

    /// Stable id of a local row.
    fn stable_id(&self, local_id: LocalId) -> Result<Option<String>, StoreError>;

    /// Replace the geometry of each listed row. Either every change is
    /// applied or none is. Returns how many rows existed and changed.
    fn update_geometries(
        &self,
        changes: &[(&str, Option<&Geometry>)],
    ) -> Result<usize, StoreError>;

    /// Overwrite attribute values by field index, all or nothing. Returns
    /// how many rows existed and changed.
    fn update_attributes(
        &self,
        changes: &[(&str, &BTreeMap<usize, FieldValue>)],
    ) -> Result<usize, StoreError>;

    /// Delete rows by stable id, returning how many were removed.
    fn delete(&self, stable_ids: &[String]) -> Result<usize, StoreError>;

    fn query(&self, query: &RowQuery) -> Result<Vec<CachedFeature>, StoreError>;

    /// Number of materialized rows.
    fn count(&self) -> Result<u64, StoreError>;

    fn max_generation(&self) -> Result<Generation, StoreError>;

    /// Record a fully downloaded region for reuse by later sessions.
    fn save_region(&self, extent: &Extent) -> Result<(), StoreError>;

    /// Remove all rows and saved regions, keeping the session identity.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Apply attribute changes to a row's values, growing it if needed.
pub(crate) fn apply_attribute_changes(
    attributes: &mut Vec<FieldValue>,
    changes: &BTreeMap<usize, FieldValue>,
) {
    for (index, value) in changes {
        if *index >= attributes.len() {
            attributes.resize(*index + 1, FieldValue::Null);
        }
        attributes[*index] = value.clone();
    }
}
