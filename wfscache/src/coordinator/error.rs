//! Coordinator error types.

use thiserror::Error;

use crate::feature::LocalId;
use crate::source::SourceError;
use crate::store::StoreError;

/// Errors opening a shared cache.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Failed to describe remote layer: {0}")]
    Source(#[from] SourceError),

    #[error("Failed to open feature store: {0}")]
    Store(#[from] StoreError),
}

/// Errors of WFS-T style mutations.
#[derive(Debug, Error)]
pub enum MutationError {
    /// No cached feature has this local id
    #[error("Feature {0} not found")]
    NotFound(LocalId),

    /// An inserted feature reuses a stable id already in the cache
    #[error("Feature '{0}' already exists")]
    AlreadyExists(String),

    /// Attribute change targets a field that does not exist or has a
    /// different type
    #[error("Invalid attribute change for field {index}: {reason}")]
    InvalidField { index: usize, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
