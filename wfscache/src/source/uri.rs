//! Data source descriptor parsing.
//!
//! Descriptors use the `key='value'` form of layer connection strings:
//!
//! ```text
//! url='https://example.org/wfs' typename='roads' version='2.0.0' filter='speed > 50'
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors parsing a data source descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("invalid value for '{key}': '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("unparseable descriptor near '{0}'")]
    Syntax(String),
}

fn pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)='((?:[^'\\]|\\.)*)'"#)
            .expect("descriptor regex is valid")
    })
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Connection descriptor for one remote feature type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceUri {
    pub url: String,
    pub type_name: String,
    /// Protocol version, or "auto" to let the source decide.
    pub version: String,
    pub filter: Option<String>,
    /// Client-side cap on features downloaded by one run.
    pub max_features: Option<u64>,
    pub srs_name: Option<String>,
    pub paging_enabled: bool,
}

impl DataSourceUri {
    /// Create a descriptor for a feature type at a service URL.
    pub fn new(url: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            type_name: type_name.into(),
            version: "auto".to_string(),
            filter: None,
            max_features: None,
            srs_name: None,
            paging_enabled: true,
        }
    }

    /// Parse a `key='value'` descriptor string.
    ///
    /// Unknown keys are ignored; `url` and `typename` are required.
    pub fn parse(input: &str) -> Result<Self, UriError> {
        let mut url = None;
        let mut type_name = None;
        let mut uri = DataSourceUri::new("", "");
        let mut rest = input.trim();

        while !rest.is_empty() {
            let caps = pair_regex()
                .captures(rest)
                .ok_or_else(|| UriError::Syntax(rest.chars().take(20).collect()))?;
            let key = caps[1].to_string();
            let value = unescape(&caps[2]);
            let consumed = caps[0].len();
            rest = rest[consumed..].trim_start();

            match key.to_ascii_lowercase().as_str() {
                "url" => url = Some(value),
                "typename" => type_name = Some(value),
                "version" => uri.version = value,
                "filter" => {
                    let trimmed = value.trim();
                    uri.filter = (!trimmed.is_empty()).then(|| trimmed.to_string());
                }
                "maxnumfeatures" | "maxfeatures" => {
                    let parsed: u64 = value.parse().map_err(|_| UriError::InvalidValue {
                        key: key.clone(),
                        value: value.clone(),
                    })?;
                    uri.max_features = (parsed > 0).then_some(parsed);
                }
                "srsname" => uri.srs_name = (!value.is_empty()).then_some(value),
                "pagingenabled" => {
                    uri.paging_enabled = match value.to_ascii_lowercase().as_str() {
                        "true" | "1" | "yes" => true,
                        "false" | "0" | "no" => false,
                        _ => return Err(UriError::InvalidValue { key, value }),
                    }
                }
                _ => {}
            }
        }

        uri.url = url.ok_or(UriError::MissingKey("url"))?;
        uri.type_name = type_name.ok_or(UriError::MissingKey("typename"))?;
        Ok(uri)
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = (!filter.trim().is_empty()).then(|| filter.trim().to_string());
        self
    }

    pub fn with_max_features(mut self, max_features: u64) -> Self {
        self.max_features = (max_features > 0).then_some(max_features);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Effective remote filter expression.
    pub fn compute_filter(&self) -> Option<String> {
        self.filter.clone()
    }

    /// Stable identifier of the cached resource.
    ///
    /// Hex SHA-256 over the fields that determine cache contents: service,
    /// feature type, version, SRS and filter. The feature cap is excluded.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.url.as_str(),
            self.type_name.as_str(),
            self.version.as_str(),
            self.srs_name.as_deref().unwrap_or(""),
            self.filter.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for DataSourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "url='{}' typename='{}' version='{}'",
            escape(&self.url),
            escape(&self.type_name),
            escape(&self.version)
        )?;
        if let Some(srs) = &self.srs_name {
            write!(f, " srsname='{}'", escape(srs))?;
        }
        if let Some(max) = self.max_features {
            write!(f, " maxNumFeatures='{}'", max)?;
        }
        if !self.paging_enabled {
            write!(f, " pagingEnabled='false'")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " filter='{}'", escape(filter))?;
        }
        Ok(())
    }
}
