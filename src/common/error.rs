//! Error types for quorumlog

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Client Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Log index not found: {0}")]
    NotFound(u64),

    // === Write Coordination Errors ===
    #[error("Write not admitted: {0}")]
    AdmissionRejected(String),

    #[error("Quorum not reached: {failed} deliveries failed, {acked} acked, needed {needed}")]
    QuorumFailed {
        needed: usize,
        acked: usize,
        failed: usize,
    },

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unexpected acknowledgment: expected {expected}, got {actual}")]
    BadAck { expected: String, actual: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Operation timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Is this a retryable transport error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::BadAck { .. }
                | Error::MalformedReply(_)
                | Error::Http(_)
        )
    }

    /// Could the peer not be reached at all (as opposed to a bad exchange)?
    pub fn is_connect(&self) -> bool {
        match self {
            Error::ConnectionFailed(_) => true,
            Error::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
