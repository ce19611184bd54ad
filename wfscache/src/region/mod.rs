//! Spatial index of requested and downloaded regions.
//!
//! The [`RegionIndex`] remembers every extent for which a download has been
//! requested, together with whether that download is still in flight or has
//! completed. It answers the question the coordinator asks on every reader
//! registration: "is this extent already cached (or about to be)?"
//!
//! # Coverage
//!
//! Coverage is a bounding-box containment test against individual records,
//! not a general polygon union. An extent straddling two cached regions is
//! reported as uncovered and triggers a new download; duplicates are then
//! filtered by stable id at write time.
//!
//! ```text
//! RegionIndex
//! ├── #0 [0, 0 : 10, 10]   Complete
//! ├── #1 [20, 0 : 30, 10]  Complete (truncated)
//! └── #2 [unbounded]       InFlight(run-3)
//! ```
//!
//! # Usage
//!
//! ```
//! use wfscache::feature::Extent;
//! use wfscache::region::{Coverage, RegionIndex};
//!
//! let index = RegionIndex::new();
//! let id = index.restore(Extent::new(0.0, 0.0, 10.0, 10.0));
//!
//! assert_eq!(index.coverage(&Extent::new(1.0, 1.0, 2.0, 2.0)), Coverage::Cached(id));
//! assert_eq!(index.coverage(&Extent::new(9.0, 9.0, 11.0, 11.0)), Coverage::Uncovered);
//! ```

mod index;
mod record;

pub use index::{Coverage, RegionIndex};
pub use record::{RegionId, RegionRecord, RegionState};
