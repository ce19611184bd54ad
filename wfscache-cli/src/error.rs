//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;
use wfscache::config::ConfigFileError;
use wfscache::coordinator::CoordinatorError;
use wfscache::source::{SourceError, UriError};
use wfscache::store::StoreError;
use wfscache::ReadError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Bad data source descriptor or bounding box
    InvalidArgument(String),
    /// Failed to create the HTTP client or talk to the server
    Source(SourceError),
    /// Failed to open the shared cache
    Open(CoordinatorError),
    /// Reading features failed
    Read(ReadError),
    /// Cache store error
    Store(StoreError),
    /// Failed to write output or remove cache files
    Io { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Open(CoordinatorError::Source(_)) | CliError::Source(_) => {
                eprintln!();
                eprintln!("Check that:");
                eprintln!("  1. The service URL is reachable");
                eprintln!("  2. The type name exists (see GetCapabilities)");
                eprintln!("  3. The server can answer with GeoJSON output");
            }
            CliError::InvalidArgument(_) => {
                eprintln!();
                eprintln!("Descriptors look like: url='https://host/wfs' typename='ns:layer'");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Source(e) => write!(f, "Feature service error: {}", e),
            CliError::Open(e) => write!(f, "Failed to open cache: {}", e),
            CliError::Read(e) => write!(f, "Failed to read features: {}", e),
            CliError::Store(e) => write!(f, "Cache store error: {}", e),
            CliError::Io { path, error } => write!(f, "I/O error on '{}': {}", path, error),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Source(e) => Some(e),
            CliError::Open(e) => Some(e),
            CliError::Read(e) => Some(e),
            CliError::Store(e) => Some(e),
            CliError::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<UriError> for CliError {
    fn from(e: UriError) -> Self {
        CliError::InvalidArgument(e.to_string())
    }
}

impl From<SourceError> for CliError {
    fn from(e: SourceError) -> Self {
        CliError::Source(e)
    }
}

impl From<CoordinatorError> for CliError {
    fn from(e: CoordinatorError) -> Self {
        CliError::Open(e)
    }
}

impl From<ReadError> for CliError {
    fn from(e: ReadError) -> Self {
        CliError::Read(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}
