//! Error types for the conference mapper.
//!
//! Library crates use [`ConfMapError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfMapError {
    /// Configuration loading or validation error. Fatal for the whole run.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network or extraction failure on a listing page. Aborts one category's crawl.
    #[error("fetch error at {url}: {message}")]
    Fetch { url: String, message: String },

    /// A raw-row sequence ended in the middle of a record pair.
    #[error("truncated row sequence for {category}: dangling row at position {position}")]
    TruncatedSequence { category: String, position: usize },

    /// The external geocoder failed (as opposed to finding nothing).
    #[error("geocoder lookup failed for {location:?}: {message}")]
    GeoLookup { location: String, message: String },

    /// The storage backend never became reachable. Fatal for the whole run.
    #[error("storage unavailable after {attempts} attempts: {message}")]
    StorageUnavailable { attempts: u32, message: String },

    /// A statement against a reachable storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid identifier or data shape.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ConfMapError>;

impl ConfMapError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error for a page URL.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a geocoder failure for a location name.
    pub fn geo(location: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::GeoLookup {
            location: location.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the whole batch rather than one category.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. } | Self::Config { .. })
    }
}
