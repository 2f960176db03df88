//! Error types for catalog-prices
//!
//! Two families of errors live here:
//! - [`Error`] covers structural failures that abort a run (bad configuration,
//!   failed login, missing article column, unreadable spreadsheet).
//! - [`FetchError`] covers per-article failures. These never abort a batch;
//!   the bulk fetcher captures them next to the article they belong to and
//!   the merge step renders them as sentinel cells.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for catalog-prices operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for catalog-prices
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "fetch.max_concurrent")
        key: Option<String>,
    },

    /// Login against the catalog API failed after all attempts
    #[error("authentication failed after {attempts} attempt(s): {message}")]
    Auth {
        /// Number of login attempts made
        attempts: u32,
        /// Description of the last failure
        message: String,
    },

    /// The configured article column is absent from the header row
    #[error("column '{column}' not found in header row {header_row}")]
    ColumnNotFound {
        /// Header text that was searched for
        column: String,
        /// 1-based header row that was searched
        header_row: u32,
    },

    /// Spreadsheet could not be read or written
    #[error("spreadsheet error for {path}: {message}")]
    Spreadsheet {
        /// File being read or written
        path: PathBuf,
        /// Underlying codec error
        message: String,
    },

    /// File extension not handled by any spreadsheet codec
    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of per-article fetching (client construction, login transport)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Wrap a codec error for the given spreadsheet path
    pub(crate) fn spreadsheet(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::Spreadsheet {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Failure of a single article lookup
///
/// Captured per article by [`BulkFetcher`](crate::fetcher::BulkFetcher) and
/// never propagated past the batch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The server could not be reached
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered 404 for this article
    #[error("article not found")]
    NotFound,

    /// The server answered with a non-success status other than 404
    #[error("HTTP status {status}")]
    Http {
        /// Response status code
        status: u16,
    },

    /// The response body was not valid JSON
    #[error("invalid response body: {0}")]
    Decode(String),

    /// Any other failure while talking to the server
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// The row carried no article identifier, so nothing was requested
    #[error("blank article identifier")]
    BlankArticle,
}

impl FetchError {
    /// Machine-readable error code, used as a structured logging field
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Connect(_) => "connect",
            FetchError::NotFound => "not_found",
            FetchError::Http { .. } => "http",
            FetchError::Decode(_) => "decode",
            FetchError::Unexpected(_) => "unexpected",
            FetchError::BlankArticle => "blank_article",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            match status.as_u16() {
                404 => FetchError::NotFound,
                status => FetchError::Http { status },
            }
        } else {
            FetchError::Unexpected(e.to_string())
        }
    }
}
