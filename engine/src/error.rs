//! Error types for the Tidy engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the Tidy engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Inbound message errors
    #[error("change message has no id")]
    MissingId,

    #[error("invalid record id: {0}")]
    InvalidId(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Local mutation errors
    #[error("task text must not be empty")]
    EmptyText,

    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
