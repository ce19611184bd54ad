//! wfscache - client-side cache and background synchronization for WFS layers
//!
//! A [`SharedCache`] fronts one remote feature resource. Readers register
//! the extent they want; uncovered extents are fetched page by page by a
//! background run while readers drain whatever has already been persisted.
//!
//! ```ignore
//! use wfscache::{CacheConfig, DataSourceUri, Extent, ReqwestClient, SharedCache, WfsHttpSource};
//!
//! let uri = DataSourceUri::parse("url='https://example.org/wfs' typename='roads'")?;
//! let source = WfsHttpSource::new(ReqwestClient::new()?, uri.clone());
//! let cache = SharedCache::open_on_disk(CacheConfig::default(), uri, source).await?;
//!
//! let mut reader = cache.reader(Extent::unbounded());
//! while let Some(batch) = reader.next_batch().await? {
//!     for feature in batch {
//!         println!("{}", feature.stable_id);
//!     }
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod count;
pub mod download;
pub mod feature;
pub mod logging;
pub mod reader;
pub mod region;
pub mod source;
pub mod store;

pub use coordinator::{CacheConfig, OverlapPolicy, SharedCache};
pub use feature::{Extent, Generation, LocalId};
pub use reader::{FeatureReader, ReadError};
pub use source::{DataSourceUri, FeatureSource, ReqwestClient, WfsHttpSource};

/// Version of the wfscache library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
