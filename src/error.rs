//! Error types for the chat relay.

use thiserror::Error;

use crate::completion::UpstreamError;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No conversation exists for the given session identifier.
    #[error("conversation not found: {0}")]
    NotFound(String),
    /// Malformed or incomplete client input.
    #[error("invalid request: {0}")]
    Validation(String),
    /// The completion API call failed.
    #[error("completion api error: {0}")]
    Upstream(#[from] UpstreamError),
    /// Invalid configuration or missing required values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A stored row could not be mapped back into a domain value.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl RelayError {
    /// Whether this error is the caller's fault rather than the relay's.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Validation(_))
    }
}

/// Convenience result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
