//! Feature and geometry types shared by the cache, the store and the sources.
//!
//! A [`SourceFeature`] is what a remote source decodes from a response page.
//! Once persisted it becomes a [`CachedFeature`], which additionally carries
//! the local row id and the generation counter value it was written under.

mod extent;
mod types;

pub use extent::Extent;
pub use types::{
    CachedFeature, Field, FieldKind, FieldValue, Generation, Geometry, LocalId, SourceFeature,
    INITIAL_GENERATION,
};
