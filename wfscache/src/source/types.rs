//! Feature source trait and the types crossing its boundary.

use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::feature::{Extent, Field, SourceFeature};

/// Errors returned by a feature source.
///
/// The three variants must stay distinguishable: the downloader retries
/// transient errors, fails the run on protocol errors, and the count
/// estimator falls back to local counting on unsupported operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Network-level failure that may succeed on retry
    #[error("transient network error: {0}")]
    Transient(String),

    /// Malformed or unexpected response; retrying will not help
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server does not support the requested operation
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Returns true if the request may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Opaque continuation token returned with a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(pub String);

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request for one page of features.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub extent: Extent,
    /// Remote filter expression, if any.
    pub filter: Option<String>,
    /// Continuation token from the previous page; `None` for the first page.
    pub token: Option<PageToken>,
    /// Maximum number of features wanted in this page.
    pub limit: Option<u64>,
}

/// One page of decoded features.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub features: Vec<SourceFeature>,
    /// Token for the next page, or `None` when the source is exhausted.
    pub next: Option<PageToken>,
}

impl Page {
    /// A final page.
    pub fn last(features: Vec<SourceFeature>) -> Self {
        Self {
            features,
            next: None,
        }
    }
}

/// Outcome of a count-only request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountResponse {
    /// The server returned an exact count.
    Exact(u64),
    /// The server does not support count-only requests.
    Unsupported,
}

/// Layer description obtained when the cache is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCapabilities {
    /// Protocol version in use (e.g. "2.0.0").
    pub version: String,
    /// Attribute fields, in the order values appear in features.
    pub fields: Vec<Field>,
    /// Name of the geometry attribute.
    pub geometry_attribute: String,
    /// SRS name used in requests.
    pub srs_name: Option<String>,
    /// Server-side limit of features per response. Valid if `Some`.
    pub max_features_server: Option<u64>,
    /// Whether the server pages results beyond `max_features_server`.
    pub supports_paging: bool,
    /// Whether count-only (hits) requests are supported.
    pub supports_hits: bool,
    /// Advertised extent of the whole layer, if known.
    pub layer_extent: Option<Extent>,
}

impl SourceCapabilities {
    /// Capabilities of a paging, hits-capable source with the given schema.
    pub fn new(version: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            version: version.into(),
            fields,
            geometry_attribute: "geometry".to_string(),
            srs_name: None,
            max_features_server: None,
            supports_paging: true,
            supports_hits: true,
            layer_extent: None,
        }
    }
}

/// A remote paginated feature service.
///
/// Implementations own timeouts on their network calls; the cache only
/// reacts to the returned results.
pub trait FeatureSource: Send + Sync + 'static {
    /// Describe the layer: schema, paging and counting support.
    fn describe(&self) -> impl Future<Output = Result<SourceCapabilities, SourceError>> + Send;

    /// Fetch one page of features.
    fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> impl Future<Output = Result<Page, SourceError>> + Send;

    /// Issue a count-only request.
    ///
    /// Returns `Ok(CountResponse::Unsupported)` when the server signals it
    /// cannot count; transport and parse failures are errors.
    fn fetch_count(
        &self,
        filter: Option<&str>,
    ) -> impl Future<Output = Result<CountResponse, SourceError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(SourceError::Transient("reset".into()).is_retryable());
        assert!(!SourceError::Protocol("bad json".into()).is_retryable());
        assert!(!SourceError::Unsupported("hits".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SourceError::Protocol("unexpected EOF".into());
        assert_eq!(err.to_string(), "protocol error: unexpected EOF");
    }

    #[test]
    fn test_default_capabilities() {
        let caps = SourceCapabilities::new("2.0.0", vec![]);
        assert!(caps.supports_paging);
        assert!(caps.supports_hits);
        assert_eq!(caps.max_features_server, None);
    }
}
