//! Fetch error types

use thiserror::Error;

/// Bundle fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS, TLS, or timeout failure before any response arrived
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The server answered with 404.
    ///
    /// The message carries the status line verbatim so it can be surfaced in
    /// status conditions.
    #[error("unexpected status \"{status}\"")]
    NotFound { status: String },

    /// Any other non-success response
    #[error("unexpected status \"{status}\"")]
    Server { status: String },

    /// The source descriptor names no location this fetcher supports
    #[error("unsupported source: {message}")]
    UnsupportedSource { message: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Transport {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
