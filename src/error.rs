//! Error types for fetching and analysing price data.

use thiserror::Error;

/// Why a single ticker could not be fetched.
///
/// These never abort a batch: the orchestrator logs them and drops the ticker.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network failure, timeout or an unreadable body
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The quote service answered with a non-success status
    #[error("unexpected HTTP status {status}")]
    Status {
        /// Numeric HTTP status code
        status: u16,
    },

    /// The quote service is throttling us
    #[error("rate limited (HTTP {status})")]
    RateLimited {
        /// Numeric HTTP status code (429 or 418)
        status: u16,
    },

    /// The payload carried an explicit `chart.error` object
    #[error("remote error {code}: {description}")]
    Remote {
        /// Error code reported by the service
        code: String,
        /// Human readable description reported by the service
        description: String,
    },

    /// The payload did not have the expected chart shape
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The payload was well formed but had no observations
    #[error("no observations in payload")]
    Empty,
}

/// Errors surfaced by the batch fetch and the derived metrics.
#[derive(Error, Debug)]
pub enum ScreenerError {
    /// Every requested ticker failed to fetch
    #[error("no data available: all {requested} ticker(s) failed to fetch")]
    NoDataAvailable {
        /// Number of distinct tickers that were requested
        requested: usize,
    },

    /// A statistic needs more rows than the table holds
    #[error("insufficient history: need {required} observation(s), have {available}")]
    InsufficientHistory {
        /// Rows required by the statistic
        required: usize,
        /// Rows actually available
        available: usize,
    },

    /// A caller supplied parameter is out of range
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The symbol is empty or contains characters no exchange symbol uses
    #[error("invalid ticker {0:?}")]
    InvalidTicker(String),

    /// The requested ticker has no column in the table
    #[error("ticker {0} not present in the price table")]
    UnknownTicker(String),

    /// The HTTP client could not be constructed
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

impl ScreenerError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreenerError>;
