//! Error types for the list layer.

use thiserror::Error;

/// Errors that can occur in list operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListError {
    #[error("List not found: {0}")]
    ListNotFound(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Persistence queue is full")]
    QueueFull,

    #[error("Persistence queue is closed")]
    PersistenceClosed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ListError {
    fn from(err: serde_json::Error) -> Self {
        ListError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ListError>;
