//! User configuration for wfscache.
//!
//! Settings are read from `~/.wfscache/config.ini`:
//!
//! ```ini
//! [cache]
//! batch_size = 500
//! overlap_policy = supersede
//!
//! [download]
//! max_retries = 3
//! ```
//!
//! A [`ConfigFile`] converts into the runtime configs of the components,
//! e.g. `CacheConfig::from(&config_file)`.

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{DEFAULT_LOG_FILE_NAME, DEFAULT_TTL_DAYS};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, DownloadSettings, LoggingSettings};
