//! In-memory feature store.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use parking_lot::RwLock;

use super::r#trait::{apply_attribute_changes, FeatureStore};
use super::types::{NewRow, ResumeState, RowCursor, RowQuery, StoreDescriptor, StoreError};
use crate::feature::{CachedFeature, Extent, FieldValue, Generation, Geometry, LocalId};

struct SessionMeta {
    cache_key: String,
    schema_fingerprint: String,
    created: Instant,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<RowCursor, CachedFeature>,
    by_stable_id: HashMap<String, RowCursor>,
    by_local_id: HashMap<LocalId, RowCursor>,
    regions: Vec<Extent>,
    next_id: i64,
    meta: Option<SessionMeta>,
}

impl Inner {
    fn row_mut(&mut self, stable_id: &str) -> Option<&mut CachedFeature> {
        let cursor = *self.by_stable_id.get(stable_id)?;
        self.rows.get_mut(&cursor)
    }

    fn reset(&mut self) {
        self.rows.clear();
        self.by_stable_id.clear();
        self.by_local_id.clear();
        self.regions.clear();
    }
}

/// Feature store held entirely in memory.
///
/// Sharing one instance between successive coordinators behaves like
/// reopening the same on-disk store.
#[derive(Default)]
pub struct MemoryFeatureStore {
    inner: RwLock<Inner>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn open_session(&self, descriptor: &StoreDescriptor) -> Result<ResumeState, StoreError> {
        let mut inner = self.inner.write();
        let reusable = inner.meta.as_ref().is_some_and(|meta| {
            meta.cache_key == descriptor.cache_key
                && meta.schema_fingerprint == descriptor.schema_fingerprint
                && descriptor
                    .ttl
                    .map_or(true, |ttl| meta.created.elapsed() <= ttl)
        });

        if reusable {
            let max_generation = inner.rows.keys().map(|c| c.generation).max().unwrap_or(0);
            return Ok(ResumeState::Reused {
                max_generation,
                regions: inner.regions.clone(),
                rows: inner.rows.len() as u64,
            });
        }

        inner.reset();
        inner.meta = Some(SessionMeta {
            cache_key: descriptor.cache_key.clone(),
            schema_fingerprint: descriptor.schema_fingerprint.clone(),
            created: Instant::now(),
        });
        Ok(ResumeState::Fresh)
    }

    fn insert(&self, rows: &[NewRow]) -> Result<Vec<LocalId>, StoreError> {
        let mut inner = self.inner.write();
        if let Some(dup) = rows
            .iter()
            .find(|row| inner.by_stable_id.contains_key(&row.stable_id))
        {
            return Err(StoreError::Schema(format!(
                "duplicate stable id '{}'",
                dup.stable_id
            )));
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            inner.next_id += 1;
            let local_id = LocalId(inner.next_id);
            let cursor = RowCursor {
                generation: row.generation,
                local_id,
            };
            inner.rows.insert(
                cursor,
                CachedFeature {
                    local_id,
                    generation: row.generation,
                    stable_id: row.stable_id.clone(),
                    geometry: row.geometry.clone(),
                    attributes: row.attributes.clone(),
                },
            );
            inner.by_stable_id.insert(row.stable_id.clone(), cursor);
            inner.by_local_id.insert(local_id, cursor);
            ids.push(local_id);
        }
        Ok(ids)
    }

    fn existing_stable_ids(
        &self,
        stable_ids: &[&str],
    ) -> Result<HashMap<String, Generation>, StoreError> {
        let inner = self.inner.read();
        Ok(stable_ids
            .iter()
            .filter_map(|id| {
                inner
                    .by_stable_id
                    .get(*id)
                    .map(|cursor| (id.to_string(), cursor.generation))
            })
            .collect())
    }

    fn stable_id(&self, local_id: LocalId) -> Result<Option<String>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .by_local_id
            .get(&local_id)
            .and_then(|cursor| inner.rows.get(cursor))
            .map(|row| row.stable_id.clone()))
    }

    fn update_geometries(
        &self,
        changes: &[(&str, Option<&Geometry>)],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let mut changed = 0;
        for (stable_id, geometry) in changes {
            if let Some(row) = inner.row_mut(stable_id) {
                row.geometry = geometry.cloned();
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn update_attributes(
        &self,
        changes: &[(&str, &BTreeMap<usize, FieldValue>)],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let mut changed = 0;
        for (stable_id, values) in changes {
            if let Some(row) = inner.row_mut(stable_id) {
                apply_attribute_changes(&mut row.attributes, values);
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete(&self, stable_ids: &[String]) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let mut removed = 0;
        for stable_id in stable_ids {
            if let Some(cursor) = inner.by_stable_id.remove(stable_id) {
                inner.by_local_id.remove(&cursor.local_id);
                inner.rows.remove(&cursor);
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn query(&self, query: &RowQuery) -> Result<Vec<CachedFeature>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .rows
            .range(query.after..)
            .map(|(_, row)| row)
            .take_while(|row| row.generation <= query.up_to)
            .filter(|row| query.matches(row))
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.inner.read().rows.len() as u64)
    }

    fn max_generation(&self) -> Result<Generation, StoreError> {
        Ok(self
            .inner
            .read()
            .rows
            .keys()
            .next_back()
            .map_or(0, |cursor| cursor.generation))
    }

    fn save_region(&self, extent: &Extent) -> Result<(), StoreError> {
        self.inner.write().regions.push(*extent);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.write().reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn row(generation: Generation, stable_id: &str, x: f64) -> NewRow {
        NewRow {
            generation,
            stable_id: stable_id.to_string(),
            geometry: Some(Geometry::new(Extent::point(x, x), b"{}".to_vec())),
            attributes: vec![FieldValue::Integer(1), FieldValue::Text("a".into())],
        }
    }

    fn descriptor(key: &str) -> StoreDescriptor {
        StoreDescriptor {
            cache_key: key.to_string(),
            schema_fingerprint: "schema".to_string(),
            ttl: None,
        }
    }

    fn all(generation: Generation) -> RowQuery {
        RowQuery {
            after: RowCursor::default(),
            up_to: generation,
            extent: Extent::unbounded(),
            limit: usize::MAX,
        }
    }

    #[test]
    fn test_insert_and_query_in_generation_order() {
        let store = MemoryFeatureStore::new();
        store.insert(&[row(2, "b", 1.0)]).unwrap();
        store.insert(&[row(1, "a", 1.0)]).unwrap();

        let rows = store.query(&all(2)).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.stable_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.max_generation().unwrap(), 2);
    }

    #[test]
    fn test_query_respects_upper_bound_and_cursor() {
        let store = MemoryFeatureStore::new();
        let ids = store
            .insert(&[row(1, "a", 1.0), row(1, "b", 2.0)])
            .unwrap();
        store.insert(&[row(2, "c", 3.0)]).unwrap();

        let mut query = all(1);
        query.after = RowCursor {
            generation: 1,
            local_id: ids[0],
        };
        let rows = store.query(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stable_id, "b");
    }

    #[test]
    fn test_query_extent() {
        let store = MemoryFeatureStore::new();
        store
            .insert(&[row(1, "a", 1.0), row(1, "b", 20.0)])
            .unwrap();
        let mut query = all(1);
        query.extent = Extent::new(0.0, 0.0, 5.0, 5.0);
        let rows = store.query(&query).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stable_id, "a");
    }

    #[test]
    fn test_duplicate_stable_id_rejected() {
        let store = MemoryFeatureStore::new();
        store.insert(&[row(1, "a", 1.0)]).unwrap();
        assert!(store.insert(&[row(2, "a", 1.0)]).is_err());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_mutations() {
        let store = MemoryFeatureStore::new();
        let ids = store.insert(&[row(1, "a", 1.0)]).unwrap();
        assert_eq!(store.stable_id(ids[0]).unwrap().as_deref(), Some("a"));

        let changes = BTreeMap::from([(1, FieldValue::Text("renamed".into()))]);
        assert_eq!(store.update_attributes(&[("a", &changes), ("zz", &changes)]).unwrap(), 1);
        assert_eq!(store.update_geometries(&[("a", None)]).unwrap(), 1);

        let rows = store.query(&all(1)).unwrap();
        assert_eq!(rows[0].attributes[1], FieldValue::Text("renamed".into()));
        assert_eq!(rows[0].geometry, None);

        assert_eq!(store.delete(&["a".to_string(), "zz".to_string()]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.stable_id(ids[0]).unwrap(), None);
    }

    #[test]
    fn test_session_reuse() {
        let store = MemoryFeatureStore::new();
        assert_eq!(store.open_session(&descriptor("k")).unwrap(), ResumeState::Fresh);
        store.insert(&[row(3, "a", 1.0)]).unwrap();
        store.save_region(&Extent::new(0.0, 0.0, 1.0, 1.0)).unwrap();

        match store.open_session(&descriptor("k")).unwrap() {
            ResumeState::Reused {
                max_generation,
                regions,
                rows,
            } => {
                assert_eq!(max_generation, 3);
                assert_eq!(regions.len(), 1);
                assert_eq!(rows, 1);
            }
            other => panic!("expected reuse, got {:?}", other),
        }

        assert_eq!(store.open_session(&descriptor("other")).unwrap(), ResumeState::Fresh);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_expired_session_is_reset() {
        let store = MemoryFeatureStore::new();
        store.open_session(&descriptor("k")).unwrap();
        store.insert(&[row(1, "a", 1.0)]).unwrap();

        let mut expiring = descriptor("k");
        expiring.ttl = Some(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.open_session(&expiring).unwrap(), ResumeState::Fresh);
    }
}
