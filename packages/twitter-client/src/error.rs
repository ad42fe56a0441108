//! Typed errors for the Twitter client.

use thiserror::Error;

/// Errors surfaced by the transport and the endpoint wrappers.
#[derive(Debug, Error)]
pub enum TwitterError {
    /// Every attempt came back with a non-200 status.
    #[error("gave up after {attempts} attempts (last status {status}): {body}")]
    RetriesExhausted {
        status: u16,
        body: String,
        attempts: u32,
    },

    /// The call exceeded the per-request timeout.
    #[error("request to {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Body was not the JSON shape we expected.
    #[error("failed to decode {endpoint} response: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// Lookup called with more ids than the endpoint accepts.
    #[error("lookup batch of {size} ids exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },
}

impl TwitterError {
    /// True when the failure came from the retry bound rather than the network.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, TwitterError::RetriesExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, TwitterError>;
