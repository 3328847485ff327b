//! Error types for the replication layer.

use thiserror::Error;

/// Errors that can occur while coordinating replicas.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DynamoError {
    #[error("Insufficient replicas: {required} required, {available} available")]
    InsufficientReplicas { required: usize, available: usize },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Request to {node} timed out after {timeout_ms} ms")]
    Timeout { node: String, timeout_ms: u64 },

    #[error("Unexpected response from {node}: {detail}")]
    UnexpectedResponse { node: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for DynamoError {
    fn from(err: serde_json::Error) -> Self {
        DynamoError::MalformedMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DynamoError>;
