//! Error types shared by the orchestration core and its collaborator adapters.
use thiserror::Error;

/// Failures reported by the data, search and image collaborators.
///
/// The core treats these as opaque: a page-fetch failure is surfaced as
/// [`OrchestratorState::Failed`](crate::model::OrchestratorState::Failed),
/// an image failure is logged and swallowed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Body could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    #[error("No access token configured")]
    MissingToken,
    /// The collaborator task panicked before producing a result.
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TransportError {
    /// Returns true if this error is transient and the request should be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Network(_) => true,
            TransportError::HttpStatus(status) => *status >= 500 || *status == 429,
            TransportError::Decode(_)
            | TransportError::ResponseTooLarge(_)
            | TransportError::InvalidUrl(_)
            | TransportError::InsecureBaseUrl
            | TransportError::MissingToken
            | TransportError::Panicked(_) => false,
        }
    }
}

/// Caller misuse and internal invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
    /// A task was registered under a key that is already in flight.
    ///
    /// Never surfaces when callers check `has` before `register`.
    #[error("Duplicate task key: {0}")]
    DuplicateKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::HttpStatus(503).is_retryable());
        assert!(TransportError::HttpStatus(429).is_retryable());
        assert!(!TransportError::HttpStatus(404).is_retryable());
        assert!(!TransportError::Decode("bad".into()).is_retryable());
        assert!(!TransportError::MissingToken.is_retryable());
    }

    #[test]
    fn test_index_out_of_range_message() {
        let err = CoreError::IndexOutOfRange { index: 5, len: 2 };
        assert_eq!(err.to_string(), "Index 5 out of range (len 2)");
    }
}
