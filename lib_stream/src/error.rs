//! Error types for the stream core.
//!
//! Only [`TransportError`] drives connection state transitions. Every other
//! kind terminates at the operation that produced it.

use thiserror::Error;

/// Connection-level failures. These schedule a reconnect and are never
/// surfaced to subscribers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to stream: {0}")]
    Connect(String),

    #[error("Stream rejected the request: {0}")]
    InvalidResponse(String),

    #[error("Stream closed by remote host")]
    Closed,

    #[error("Stream read error: {0}")]
    Read(String),
}

/// A message body that could not be turned into a snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed message body: {0}")]
    Malformed(String),

    #[error("Message body is not a JSON object (found {0})")]
    NotAnObject(&'static str),
}

/// Pagination, control, upload and polling request failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest_middleware::Error),

    #[error("Response read failed: {0}")]
    Response(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response body: {0}")]
    Body(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Body(e.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(e: url::ParseError) -> Self {
        FetchError::InvalidEndpoint(e.to_string())
    }
}

/// Returned by a subscriber that could not process its section.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid endpoint path '{path}': {source}")]
    Endpoint {
        path: String,
        #[source]
        source: url::ParseError,
    },
}
