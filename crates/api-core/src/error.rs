//! Error types for business-API operations.

use thiserror::Error;

/// Errors surfaced by [`crate::ApiClient`].
///
/// Everything here is transient from the bridge's point of view: a failed
/// API call is reported back to the AI as a structured JSON error and the
/// conversation continues.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-2xx status.
    #[error("API returned {status} for {endpoint}")]
    Status {
        /// HTTP status code returned by the API
        status: u16,
        /// Endpoint path that produced the status
        endpoint: String,
    },

    /// The request did not complete within its per-call timeout.
    #[error("API request to {endpoint} timed out")]
    Timeout {
        /// Endpoint path that timed out
        endpoint: String,
    },

    /// Transport-level failure (DNS, connect, TLS, ...).
    #[error("API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("unexpected API response from {endpoint}: {reason}")]
    InvalidResponse {
        /// Endpoint path that produced the body
        endpoint: String,
        /// What was wrong with it
        reason: String,
    },
}

impl ApiError {
    /// Classify a reqwest error for `endpoint`, folding timeouts into
    /// [`ApiError::Timeout`].
    pub(crate) fn from_reqwest(err: reqwest::Error, endpoint: &str) -> Self {
        if err.is_timeout() {
            ApiError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else {
            ApiError::Transport(err)
        }
    }
}
