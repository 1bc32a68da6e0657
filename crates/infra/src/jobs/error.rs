use thiserror::Error;

use safework_ai::AiError;

use crate::cache::CacheError;
use crate::db::DbError;
use crate::storage::StorageError;

/// Failure inside a job handler. Every variant leads to a retry of the message.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("no handler registered for job type {0:?}")]
    UnknownJobType(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<csv::Error> for JobError {
    fn from(value: csv::Error) -> Self {
        JobError::Serialization(value.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(value: serde_json::Error) -> Self {
        JobError::Serialization(value.to_string())
    }
}
