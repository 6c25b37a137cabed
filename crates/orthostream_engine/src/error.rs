use std::time::Duration;

use thiserror::Error;

/// Failure of a request or stream, classified once at the executor boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Connection-level failure; retried.
    #[error("network error: {0}")]
    Network(String),
    /// The absolute deadline passed; never retried.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },
    /// Non-success status. 5xx is retried, 4xx is not.
    #[error("http status {status}")]
    Http { status: u16 },
    /// A successful response whose body could not be interpreted.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The body ended before a terminal message arrived.
    #[error("stream closed after {received} messages without a terminal message")]
    StreamTerminatedEarly { received: usize },
    /// The server reported a failure through an `error` message.
    #[error("server error: {0}")]
    Server(String),
    /// The caller cancelled the request.
    #[error("cancelled")]
    Cancelled,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl RequestError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RequestError::Network(_) => true,
            RequestError::Http { status } => (500..600).contains(status),
            RequestError::Timeout { .. }
            | RequestError::Protocol(_)
            | RequestError::StreamTerminatedEarly { .. }
            | RequestError::Server(_)
            | RequestError::Cancelled
            | RequestError::InvalidUrl(_) => false,
        }
    }
}
