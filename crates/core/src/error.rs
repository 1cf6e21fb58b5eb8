//! Error types for the unifier.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the unifier.
///
/// Only [`Error::NoInput`] ends a run on bad data; everything else that can go
/// wrong with individual lines is recovered where it happens.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No input file matched the requested date.
    #[error("No input files for date {date} under {}", root.display())]
    NoInput {
        /// Requested date (`YYYYMMDD`).
        date: String,
        /// Root directory that was searched.
        root: PathBuf,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a missing-input error.
    pub fn no_input(date: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Error::NoInput {
            date: date.into(),
            root: root.into(),
        }
    }
}
