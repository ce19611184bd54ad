//! Background downloader.
//!
//! A run streams pages of features for one extent from a [`FeatureSource`]
//! and hands each page to a [`RunSink`] (the shared cache coordinator).
//!
//! ```text
//! Pending ──► Running ──► Completed | Cancelled | Failed
//!    │                        │
//!    └──► Superseded(next) ◄──┘ (cancelled in favour of a wider run)
//! ```
//!
//! Every run ends with exactly one [`RunSink::end_of_download`] call, on
//! every exit path. The guarantee is held by a drop guard, so a run whose
//! task is aborted or panics still reports a failure.
//!
//! [`FeatureSource`]: crate::source::FeatureSource

mod config;
mod run;
mod status;

pub use config::{DownloadConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
pub use run::{execute_run, RunSink, RunSpec, SourceLimits};
pub use status::{RunEnd, RunId, RunOutcome, RunStatus};
