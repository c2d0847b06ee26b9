use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Network(String),

    #[error("remote returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Transient failures are retried with backoff; everything else is
    /// abandoned and surfaced only as a sync-status flag.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Network(_) => true,
            StoreError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => StoreError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => StoreError::Network(err.to_string()),
        }
    }
}
