//! Remote feature sources.
//!
//! A [`FeatureSource`] is the collaborator that talks to the paginated
//! feature service: it describes the layer, returns pages of decoded
//! features and answers count-only requests. The cache never sees the wire
//! format.
//!
//! - [`WfsHttpSource`]: WFS GetFeature over HTTP with GeoJSON output
//! - [`DataSourceUri`]: connection descriptor the cache is keyed on

mod http;
mod types;
mod uri;
mod wfs;

#[cfg(test)]
pub(crate) mod test_support;

pub use http::{AsyncHttpClient, HttpResponse, ReqwestClient, DEFAULT_HTTP_TIMEOUT_SECS};
pub use types::{
    CountResponse, FeatureSource, Page, PageRequest, PageToken, SourceCapabilities, SourceError,
};
pub use uri::{DataSourceUri, UriError};
pub use wfs::{WfsHttpSource, DEFAULT_PAGE_SIZE};
