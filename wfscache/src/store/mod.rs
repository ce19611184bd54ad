//! Feature store: durable rows keyed by generation and stable id.
//!
//! The coordinator owns all writes; readers query rows directly through
//! [`FeatureStore::query`], ordered by `(generation, local id)`.
//!
//! - [`SqliteFeatureStore`]: on-disk store, one file per cached resource
//! - [`MemoryFeatureStore`]: in-process store for tests and throwaway sessions

mod memory;
mod sqlite;
mod r#trait;
mod types;

pub use memory::MemoryFeatureStore;
pub use r#trait::FeatureStore;
pub use sqlite::SqliteFeatureStore;
pub use types::{
    schema_fingerprint, NewRow, ResumeState, RowCursor, RowQuery, StoreDescriptor, StoreError,
};
