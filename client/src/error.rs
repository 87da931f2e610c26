//! Unified error handling for the client.

use std::time::Duration;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] tidy_engine::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mutation failed: {0}")]
    MutationFailed(String),

    #[error("Sync coordinator stopped")]
    Stopped,
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
