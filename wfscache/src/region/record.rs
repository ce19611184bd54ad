//! Region record type.

use std::fmt;

use crate::download::RunId;
use crate::feature::Extent;

/// Identifier of a region record within one [`RegionIndex`](super::RegionIndex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region-{}", self.0)
    }
}

/// Download state of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// A run (active or queued) will download this region.
    InFlight(RunId),
    /// The region was downloaded successfully.
    ///
    /// `truncated` is set when the download stopped at a feature cap, so the
    /// region may be missing features and cannot vouch for coverage.
    Complete { truncated: bool },
}

/// A spatial area for which a download has been requested or completed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionRecord {
    pub id: RegionId,
    pub extent: Extent,
    pub state: RegionState,
}

impl RegionRecord {
    /// Returns true if this record guarantees its extent is fully cached.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, RegionState::Complete { truncated: false })
    }

    /// Returns the run downloading this region, if any.
    pub fn in_flight_run(&self) -> Option<RunId> {
        match self.state {
            RegionState::InFlight(run) => Some(run),
            RegionState::Complete { .. } => None,
        }
    }
}
