// src/core/error.rs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Raised when user input cannot be turned into a scannable [`Target`](crate::core::models::Target).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid target '{input}': {reason}")]
pub struct InvalidTarget {
    pub input: String,
    pub reason: String,
}

impl InvalidTarget {
    pub fn new(input: &str, reason: impl Into<String>) -> Self {
        Self { input: input.to_string(), reason: reason.into() }
    }
}

/// Errors that abort a scan before any probe result exists.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTarget),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure of a single probe. Always captured into the report, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors of the [`ResultStore`](crate::core::store::ResultStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write report to {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no report with id '{0}'")]
    NotFound(String),

    #[error("report at {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}
