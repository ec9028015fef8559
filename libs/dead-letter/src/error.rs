//! Error types for the dead-letter store.

use thiserror::Error;
use uuid::Uuid;

pub type DeadLetterResult<T> = Result<T, DeadLetterError>;

#[derive(Error, Debug)]
pub enum DeadLetterError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Dead letter not found: {0}")]
    NotFound(Uuid),

    #[error("Dead letter error: {0}")]
    Other(#[from] anyhow::Error),
}
