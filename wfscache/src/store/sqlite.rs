//! SQLite-backed feature store.
//!
//! One database file per cached resource. Layout:
//!
//! ```text
//! cache_meta      (id = 1, cache_key, schema_fingerprint, created_at)
//! features        (fid, generation, stable_id, minx, miny, maxx, maxy,
//!                  geometry, attributes)
//! cached_regions  (id, minx, miny, maxx, maxy)
//! ```
//!
//! `generation` and `stable_id` are indexed; attributes are stored as a
//! JSON array in schema order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::r#trait::{apply_attribute_changes, FeatureStore};
use super::types::{NewRow, ResumeState, RowQuery, StoreDescriptor, StoreError};
use crate::feature::{CachedFeature, Extent, FieldValue, Generation, Geometry, LocalId};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cache_key TEXT NOT NULL,
    schema_fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS features (
    fid INTEGER PRIMARY KEY AUTOINCREMENT,
    generation INTEGER NOT NULL,
    stable_id TEXT NOT NULL,
    minx REAL,
    miny REAL,
    maxx REAL,
    maxy REAL,
    geometry BLOB,
    attributes TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS features_generation ON features (generation, fid);
CREATE UNIQUE INDEX IF NOT EXISTS features_stable_id ON features (stable_id);
CREATE INDEX IF NOT EXISTS features_bbox ON features (minx, maxx, miny, maxy);
CREATE TABLE IF NOT EXISTS cached_regions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    minx REAL,
    miny REAL,
    maxx REAL,
    maxy REAL
);
";

const SELECT_COLUMNS: &str =
    "fid, generation, stable_id, minx, miny, maxx, maxy, geometry, attributes";

/// Feature store in a SQLite database.
pub struct SqliteFeatureStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteFeatureStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file path, if on disk.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn reset(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch("DELETE FROM features; DELETE FROM cached_regions;")?;
        Ok(())
    }
}

fn to_sql_generation(generation: Generation) -> i64 {
    generation.min(i64::MAX as u64) as i64
}

fn bounds_params(extent: Option<&Extent>) -> [Option<f64>; 4] {
    match extent {
        Some(e) if !e.is_unbounded() => [Some(e.min_x), Some(e.min_y), Some(e.max_x), Some(e.max_y)],
        _ => [None; 4],
    }
}

fn read_feature(row: &Row<'_>) -> rusqlite::Result<(CachedFeature, String)> {
    let bounds: [Option<f64>; 4] = [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?];
    let encoded: Option<Vec<u8>> = row.get(7)?;
    let geometry = match (bounds, encoded) {
        ([Some(x1), Some(y1), Some(x2), Some(y2)], Some(encoded)) => {
            Some(Geometry::new(Extent::new(x1, y1, x2, y2), encoded))
        }
        _ => None,
    };
    let generation: i64 = row.get(1)?;
    Ok((
        CachedFeature {
            local_id: LocalId(row.get(0)?),
            generation: generation.max(0) as Generation,
            stable_id: row.get(2)?,
            geometry,
            attributes: Vec::new(),
        },
        row.get(8)?,
    ))
}

fn decode_attributes(
    rows: Vec<(CachedFeature, String)>,
) -> Result<Vec<CachedFeature>, StoreError> {
    rows.into_iter()
        .map(|(mut feature, json)| {
            feature.attributes = serde_json::from_str(&json)?;
            Ok(feature)
        })
        .collect()
}

impl FeatureStore for SqliteFeatureStore {
    fn open_session(&self, descriptor: &StoreDescriptor) -> Result<ResumeState, StoreError> {
        let conn = self.conn.lock();
        let meta: Option<(String, String, String)> = conn
            .query_row(
                "SELECT cache_key, schema_fingerprint, created_at FROM cache_meta WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let reusable = match &meta {
            Some((key, fingerprint, created_at)) => {
                let fresh_enough = match descriptor.ttl {
                    None => true,
                    Some(ttl) => DateTime::parse_from_rfc3339(created_at)
                        .ok()
                        .and_then(|created| {
                            let age = Utc::now().signed_duration_since(created);
                            chrono::Duration::from_std(ttl).ok().map(|ttl| age <= ttl)
                        })
                        .unwrap_or(false),
                };
                *key == descriptor.cache_key
                    && *fingerprint == descriptor.schema_fingerprint
                    && fresh_enough
            }
            None => false,
        };

        if reusable {
            let max_generation: i64 =
                conn.query_row("SELECT COALESCE(MAX(generation), 0) FROM features", [], |r| {
                    r.get(0)
                })?;
            let rows: i64 = conn.query_row("SELECT COUNT(*) FROM features", [], |r| r.get(0))?;
            let mut stmt = conn.prepare("SELECT minx, miny, maxx, maxy FROM cached_regions")?;
            let regions = stmt
                .query_map([], |row| {
                    let b: [Option<f64>; 4] = [row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?];
                    Ok(match b {
                        [Some(x1), Some(y1), Some(x2), Some(y2)] => Extent::new(x1, y1, x2, y2),
                        _ => Extent::unbounded(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            info!(
                path = ?self.path,
                generation = max_generation,
                rows = rows,
                regions = regions.len(),
                "Reusing persisted feature cache"
            );
            return Ok(ResumeState::Reused {
                max_generation: max_generation.max(0) as Generation,
                regions,
                rows: rows.max(0) as u64,
            });
        }

        if meta.is_some() {
            debug!(path = ?self.path, "Persisted feature cache is stale, resetting");
        }
        Self::reset(&conn)?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_meta (id, cache_key, schema_fingerprint, created_at)
             VALUES (1, ?1, ?2, ?3)",
            params![
                descriptor.cache_key,
                descriptor.schema_fingerprint,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(ResumeState::Fresh)
    }

    fn insert(&self, rows: &[NewRow]) -> Result<Vec<LocalId>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO features
                 (generation, stable_id, minx, miny, maxx, maxy, geometry, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for row in rows {
                let [minx, miny, maxx, maxy] =
                    bounds_params(row.geometry.as_ref().map(|g| &g.bounds));
                stmt.execute(params![
                    to_sql_generation(row.generation),
                    row.stable_id,
                    minx,
                    miny,
                    maxx,
                    maxy,
                    row.geometry.as_ref().map(|g| g.encoded.as_slice()),
                    serde_json::to_string(&row.attributes)?,
                ])?;
                ids.push(LocalId(tx.last_insert_rowid()));
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn existing_stable_ids(
        &self,
        stable_ids: &[&str],
    ) -> Result<HashMap<String, Generation>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT generation FROM features WHERE stable_id = ?1")?;
        let mut found = HashMap::new();
        for id in stable_ids {
            let generation: Option<i64> =
                stmt.query_row(params![id], |row| row.get(0)).optional()?;
            if let Some(generation) = generation {
                found.insert(id.to_string(), generation.max(0) as Generation);
            }
        }
        Ok(found)
    }

    fn stable_id(&self, local_id: LocalId) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT stable_id FROM features WHERE fid = ?1",
                params![local_id.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn update_geometries(
        &self,
        changes: &[(&str, Option<&Geometry>)],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE features SET minx = ?1, miny = ?2, maxx = ?3, maxy = ?4, geometry = ?5
                 WHERE stable_id = ?6",
            )?;
            for (stable_id, geometry) in changes {
                let [minx, miny, maxx, maxy] = bounds_params(geometry.map(|g| &g.bounds));
                changed += stmt.execute(params![
                    minx,
                    miny,
                    maxx,
                    maxy,
                    geometry.map(|g| g.encoded.as_slice()),
                    stable_id
                ])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn update_attributes(
        &self,
        changes: &[(&str, &BTreeMap<usize, FieldValue>)],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        // Dropping the transaction on an error rolls back earlier rows.
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut select =
                tx.prepare_cached("SELECT attributes FROM features WHERE stable_id = ?1")?;
            let mut update =
                tx.prepare_cached("UPDATE features SET attributes = ?1 WHERE stable_id = ?2")?;
            for (stable_id, values) in changes {
                let current: Option<String> = select
                    .query_row(params![stable_id], |row| row.get(0))
                    .optional()?;
                let Some(current) = current else {
                    continue;
                };
                let mut attributes: Vec<FieldValue> = serde_json::from_str(&current)?;
                apply_attribute_changes(&mut attributes, values);
                update.execute(params![serde_json::to_string(&attributes)?, stable_id])?;
                changed += 1;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    fn delete(&self, stable_ids: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM features WHERE stable_id = ?1")?;
            for id in stable_ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn query(&self, query: &RowQuery) -> Result<Vec<CachedFeature>, StoreError> {
        let conn = self.conn.lock();
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let after_generation = to_sql_generation(query.after.generation);
        let up_to = to_sql_generation(query.up_to);

        let rows = if query.extent.is_unbounded() {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM features
                 WHERE generation <= ?1
                   AND (generation > ?2 OR (generation = ?2 AND fid > ?3))
                 ORDER BY generation, fid LIMIT ?4",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![up_to, after_generation, query.after.local_id.0, limit],
                    read_feature,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        } else {
            let e = &query.extent;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM features
                 WHERE generation <= ?1
                   AND (generation > ?2 OR (generation = ?2 AND fid > ?3))
                   AND minx <= ?5 AND maxx >= ?6 AND miny <= ?7 AND maxy >= ?8
                 ORDER BY generation, fid LIMIT ?4",
                SELECT_COLUMNS
            ))?;
            let rows = stmt
                .query_map(
                    params![
                        up_to,
                        after_generation,
                        query.after.local_id.0,
                        limit,
                        e.max_x,
                        e.min_x,
                        e.max_y,
                        e.min_y
                    ],
                    read_feature,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        decode_attributes(rows)
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM features", [], |r| r.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn max_generation(&self) -> Result<Generation, StoreError> {
        let conn = self.conn.lock();
        let max: i64 =
            conn.query_row("SELECT COALESCE(MAX(generation), 0) FROM features", [], |r| {
                r.get(0)
            })?;
        Ok(max.max(0) as Generation)
    }

    fn save_region(&self, extent: &Extent) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let [minx, miny, maxx, maxy] = bounds_params(Some(extent));
        conn.execute(
            "INSERT INTO cached_regions (minx, miny, maxx, maxy) VALUES (?1, ?2, ?3, ?4)",
            params![minx, miny, maxx, maxy],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::reset(&conn)
    }
}
