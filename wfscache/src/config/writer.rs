//! INI serialization logic for converting `ConfigFile` → INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let max_features = config
        .download
        .max_features
        .map(|n| n.to_string())
        .unwrap_or_default();
    let page_size = config
        .download
        .page_size
        .map(|n| n.to_string())
        .unwrap_or_default();

    format!(
        r#"; wfscache configuration
; Values left empty fall back to their defaults

[cache]
; Directory holding one SQLite file per cached resource
; (default: ~/.cache/wfscache)
directory = {}
; Features returned to a reader per batch (default: 500)
batch_size = {}
; Days a persisted cache may be reused before it is discarded (default: 7)
ttl_days = {}
; What happens when a region is requested while a download is running
;   supersede - cancel the running download and restart on the union
;   queue     - finish the running download first, then fetch the rest
overlap_policy = {}

[download]
; Retries of a page after a transient error (default: 3)
max_retries = {}
; Base delay of the exponential backoff in milliseconds (default: 100)
retry_base_delay_ms = {}
; Client-side cap on features per download (empty: no cap)
max_features = {}
; Features requested per page (empty: server default)
page_size = {}
; HTTP request timeout in seconds (default: 30)
timeout = {}

[logging]
; Log file path (default: ~/.wfscache/wfscache.log)
file = {}
"#,
        path_to_string(&config.cache.directory),
        config.cache.batch_size,
        config.cache.ttl_days,
        config.cache.overlap_policy,
        config.download.max_retries,
        config.download.retry_base_delay_ms,
        max_features,
        page_size,
        config.download.timeout_secs,
        path_to_string(&config.logging.file),
    )
}

/// Shortens paths under the home directory to `~/...`.
fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
