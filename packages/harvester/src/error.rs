//! Typed errors for the harvester library.
//!
//! Uses `thiserror` for library errors; the `harvest` binary wraps them in
//! `anyhow` at the edge.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can stop a window batch or an enrichment run from starting
/// or finishing. Search failures are reported per window instead.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Artifact could not be read or written
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration rejected before any request was made
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from reading or materializing delimited artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Input artifact lacks the primary key column
    #[error("{path} has no `id` column")]
    MissingIdColumn { path: PathBuf },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no bearer token found in TWITTERTOKEN or TWITTER_BEARER_TOKEN")]
    MissingToken,

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
