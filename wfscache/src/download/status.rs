//! Run identity, status and outcome types.

use std::fmt;

/// Identifier of one downloader run within a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Status of a run as observed by readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Queued behind the active run.
    Pending,
    /// Fetching pages.
    Running,
    /// The source was exhausted or the feature cap was reached.
    Completed { truncated: bool },
    /// The run ended on an error.
    Failed(String),
    /// The run was cancelled (explicitly or by invalidation).
    Cancelled,
    /// The run was cancelled and its extent handed to a wider run.
    Superseded(RunId),
}

impl RunStatus {
    /// Returns true if the run will make no further progress.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    Cancelled,
    Failed(String),
}

/// Terminal report of a run, delivered once through `end_of_download`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub end: RunEnd,
    /// Distinct features delivered by the run.
    pub feature_count: u64,
    /// The run stopped at a client cap, or the server cut a page without
    /// offering paging.
    pub truncated: bool,
}

impl RunOutcome {
    pub fn completed(feature_count: u64, truncated: bool) -> Self {
        Self {
            end: RunEnd::Completed,
            feature_count,
            truncated,
        }
    }

    pub fn cancelled(feature_count: u64) -> Self {
        Self {
            end: RunEnd::Cancelled,
            feature_count,
            truncated: false,
        }
    }

    pub fn failed(feature_count: u64, reason: impl Into<String>) -> Self {
        Self {
            end: RunEnd::Failed(reason.into()),
            feature_count,
            truncated: false,
        }
    }

    /// Returns true if the run completed.
    pub fn success(&self) -> bool {
        matches!(self.end, RunEnd::Completed)
    }

    /// Status readers observe for this outcome.
    pub fn status(&self) -> RunStatus {
        match &self.end {
            RunEnd::Completed => RunStatus::Completed {
                truncated: self.truncated,
            },
            RunEnd::Cancelled => RunStatus::Cancelled,
            RunEnd::Failed(reason) => RunStatus::Failed(reason.clone()),
        }
    }
}
