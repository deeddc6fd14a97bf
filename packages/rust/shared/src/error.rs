//! Error types for traincrawl.
//!
//! Library crates use [`TrainCrawlError`] via `thiserror`. Failures at the
//! single-page or single-module granularity are captured into that unit's
//! result and never unwind across module boundaries.

use std::path::PathBuf;

/// Top-level error type for all traincrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum TrainCrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Invalid input that indicates a caller bug (bad URL, bad parameters).
    /// Never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Page navigation / render failure. Transient, recorded per page;
    /// navigation is not retried automatically.
    #[error("navigation error: {0}")]
    Navigation(String),

    /// Enrichment backend failure: non-2xx status, timeout, or a malformed
    /// body where JSON was required. The only retryable bucket.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Browser session launch or clone failure. Fatal for the owning
    /// module's crawl only.
    #[error("session error: {0}")]
    Session(String),

    /// Filesystem I/O error (e.g. a screenshot file that cannot be read).
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrainCrawlError>;

impl TrainCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
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

    /// Whether the enrichment client may retry after this error.
    ///
    /// Only [`TrainCrawlError::Enrichment`] qualifies: timeouts, non-2xx
    /// responses, and malformed JSON bodies. Everything else is either an
    /// environmental failure with its own handling path (navigation,
    /// session) or a caller bug, and propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Enrichment(_))
    }
}
