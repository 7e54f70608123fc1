//! Failure modes of the completion API call.

use thiserror::Error;

/// Reply text used by the compat policy when the API answered without choices.
pub const NO_REPLY_SENTINEL: &str = "⚠ No reply from the completion API.";
/// Prefix of the compat reply text for every other upstream failure.
pub const ERROR_SENTINEL_PREFIX: &str = "⚠ Error calling the completion API: ";

/// Longest upstream error body kept in an error value.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Errors produced by a completion call.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The request did not finish within the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// Connection, TLS or protocol failure.
    #[error("http request failed: {0}")]
    Transport(#[source] reqwest::Error),
    /// The API answered with a non-success status.
    #[error("http status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The response body was not the expected JSON.
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The response parsed but carried no choices.
    #[error("response contained no choices")]
    EmptyChoices,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

impl UpstreamError {
    /// Build a status error, keeping at most a bounded prefix of the body.
    #[must_use]
    pub fn status(status: u16, body: &str) -> Self {
        Self::Status {
            status,
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }
    }

    /// Whether the failure was a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Legacy reply text standing in for a real answer.
    #[must_use]
    pub fn sentinel_reply(&self) -> String {
        match self {
            Self::EmptyChoices => NO_REPLY_SENTINEL.to_string(),
            other => format!("{ERROR_SENTINEL_PREFIX}{other}"),
        }
    }
}
