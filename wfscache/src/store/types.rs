//! Store row, query and session types.

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::feature::{CachedFeature, Extent, Field, FieldValue, Generation, Geometry, LocalId};

/// Feature store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode row: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store schema mismatch: {0}")]
    Schema(String),
}

/// Identity of the data a store holds, checked when a store is reopened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    /// Key derived from the connection descriptor and filter.
    pub cache_key: String,
    /// Hash of the field schema.
    pub schema_fingerprint: String,
    /// Maximum age of a store that may be reused. `None` never expires.
    pub ttl: Option<Duration>,
}

/// Result of opening a session on a store.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeState {
    /// The store was empty, stale or foreign and has been reset.
    Fresh,
    /// The store holds a valid cache from an earlier session.
    Reused {
        max_generation: Generation,
        regions: Vec<Extent>,
        rows: u64,
    },
}

/// A row about to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRow {
    pub generation: Generation,
    pub stable_id: String,
    pub geometry: Option<Geometry>,
    pub attributes: Vec<FieldValue>,
}

/// Position of the last row a reader consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct RowCursor {
    pub generation: Generation,
    pub local_id: LocalId,
}

impl RowCursor {
    pub fn of(feature: &CachedFeature) -> Self {
        Self {
            generation: feature.generation,
            local_id: feature.local_id,
        }
    }
}

/// Range query over rows.
///
/// Matches rows strictly after `after` in `(generation, local id)` order
/// with `generation <= up_to` whose bounds intersect `extent`. Rows
/// without geometry only match an unbounded extent.
#[derive(Debug, Clone, PartialEq)]
pub struct RowQuery {
    pub after: RowCursor,
    pub up_to: Generation,
    pub extent: Extent,
    pub limit: usize,
}

impl RowQuery {
    pub(crate) fn matches(&self, feature: &CachedFeature) -> bool {
        RowCursor::of(feature) > self.after
            && feature.generation <= self.up_to
            && (self.extent.is_unbounded()
                || feature
                    .geometry
                    .as_ref()
                    .is_some_and(|g| g.bounds.intersects(&self.extent)))
    }
}

/// Stable hash of a field schema.
pub fn schema_fingerprint(fields: &[Field], geometry_attribute: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(geometry_attribute.as_bytes());
    for field in fields {
        hasher.update([0u8]);
        hasher.update(field.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(field.kind.to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}
