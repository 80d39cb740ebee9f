//! Error taxonomy for the backfill pipeline.
//!
//! Errors are values that end up embedded in the run report, so every
//! variant is serializable and cheap to clone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors that can occur while acquiring or reconciling a series.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure or timeout. Retried by the fetcher.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Remote service answered 429.
    #[error("rate limit exceeded (retry after {retry_after_secs:?}s)")]
    RateLimitExceeded {
        /// Value of the `Retry-After` header, if the service sent one.
        retry_after_secs: Option<u64>,
    },

    /// 4xx other than 429. Never retried.
    #[error("client error: {status} - {message}")]
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Retry budget spent on a retryable failure.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Display of the last retryable error.
        last_error: String,
    },

    /// A single record (or an unparsable payload) could not be normalized.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Pagination ran past the hard iteration cap.
    #[error("too many pages: exceeded cap of {cap}")]
    TooManyPages {
        /// Configured page cap.
        cap: usize,
    },

    /// The adapter cannot produce more data for this window.
    #[error("source exhausted: {0}")]
    SourceExhausted(String),

    /// The requested range is not fully covered by the available data.
    #[error("coverage gap from {from} to {to}")]
    CoverageGap {
        /// First uncovered instant.
        from: DateTime<Utc>,
        /// Last uncovered instant.
        to: DateTime<Utc>,
    },

    /// The job was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,

    /// Writing or reading an output artifact failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation inside the pipeline (e.g. a job panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    /// Creates a client error from status code and message.
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::ClientError {
            status,
            message: message.into(),
        }
    }

    /// Creates a malformed record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if the fetcher should retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimitExceeded { .. })
    }

    /// Short machine-readable name of the variant.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::ClientError { .. } => "client_error",
            Self::Exhausted { .. } => "exhausted",
            Self::MalformedRecord(_) => "malformed_record",
            Self::TooManyPages { .. } => "too_many_pages",
            Self::SourceExhausted(_) => "source_exhausted",
            Self::CoverageGap { .. } => "coverage_gap",
            Self::Cancelled => "cancelled",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
