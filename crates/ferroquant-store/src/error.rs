use thiserror::Error;

use crate::EntryKind;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable store cannot be reached; callers degrade to fetch-through.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error("key '{key}' does not belong to the {kind} namespace")]
    InvalidKey { key: String, kind: EntryKind },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(error: std::io::Error) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Unavailable(format!("store worker failed: {error}"))
    }
}
