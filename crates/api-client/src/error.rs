use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to build the HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<FetchError> },

    #[error("The API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// A payload arrived but could not be decoded into the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to decode {endpoint}: {message}")]
pub struct ValidationError {
    pub endpoint: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(endpoint: impl ToString, message: impl ToString) -> Self {
        Self { endpoint: endpoint.to_string(), message: message.to_string() }
    }
}
