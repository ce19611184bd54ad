//! INI parsing logic for converting `Ini` → `ConfigFile`.
//!
//! This is the single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;
use std::str::FromStr;

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::coordinator::OverlapPolicy;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("batch_size") {
            let size: usize = parse_number("cache", "batch_size", v)?;
            if size == 0 {
                return Err(invalid("cache", "batch_size", v, "must be at least 1"));
            }
            config.cache.batch_size = size;
        }
        if let Some(v) = section.get("ttl_days") {
            config.cache.ttl_days = parse_number("cache", "ttl_days", v)?;
        }
        if let Some(v) = section.get("overlap_policy") {
            config.cache.overlap_policy = OverlapPolicy::from_str(v)
                .map_err(|reason| invalid("cache", "overlap_policy", v, &reason))?;
        }
    }

    // [download] section
    if let Some(section) = ini.section(Some("download")) {
        if let Some(v) = section.get("max_retries") {
            config.download.max_retries = parse_number("download", "max_retries", v)?;
        }
        if let Some(v) = section.get("retry_base_delay_ms") {
            config.download.retry_base_delay_ms =
                parse_number("download", "retry_base_delay_ms", v)?;
        }
        if let Some(v) = section.get("max_features") {
            config.download.max_features = parse_optional("download", "max_features", v)?;
        }
        if let Some(v) = section.get("page_size") {
            config.download.page_size = parse_optional("download", "page_size", v)?;
        }
        if let Some(v) = section.get("timeout") {
            let secs: u64 = parse_number("download", "timeout", v)?;
            if secs == 0 {
                return Err(invalid("download", "timeout", v, "must be at least 1 second"));
            }
            config.download.timeout_secs = secs;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, "must be a non-negative integer"))
}

/// Empty values and `0` mean "not set".
fn parse_optional(section: &str, key: &str, value: &str) -> Result<Option<u64>, ConfigFileError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    let n: u64 = parse_number(section, key, value)?;
    Ok((n > 0).then_some(n))
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
