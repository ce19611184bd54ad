//! Shared cache coordinator.
//!
//! [`SharedCache`] mediates between any number of readers and the single
//! background download run:
//!
//! ```text
//! reader ──register(extent)──► SharedCache ──┬─ covered: reuse cached rows
//!   ▲                            │           ├─ in flight: attach to run
//!   │                            │           └─ otherwise: start/supersede/queue
//!   │                            ▼
//!   └── query(≤ generation) ── FeatureStore ◄── serialize ◄── download run
//! ```
//!
//! Every batch written to the store is stamped with the next value of the
//! generation counter, and the counter advances only after the write. A
//! reader draining up to a snapshot therefore never sees a partial batch,
//! and rows become visible in non-decreasing generation order.
//!
//! Invalidation bumps the epoch; readers of an older epoch are told to
//! restart instead of mixing rows from before and after.

mod cache;
mod config;
mod error;
mod feature_count;
mod mutation;
mod serialize;
mod state;
mod stats;


pub(crate) use cache::CacheInner;
pub use cache::SharedCache;
pub use config::{
    default_cache_dir, CacheConfig, OverlapPolicy, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_READER_BATCH_SIZE,
};
pub use error::{CoordinatorError, MutationError};
pub use state::{FeatureCount, Progress, Registration, SerializeReport};
pub use stats::CacheStatistics;
