//! Error types for the transactional outbox library.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur during outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message not found in outbox
    #[error("Outbox message not found: {0}")]
    MessageNotFound(Uuid),

    /// Failed to publish to the broker
    #[error("Publish failed: {0}")]
    PublishFailed(#[from] amqp_bus::BusError),

    /// Envelope construction failed
    #[error("Envelope error: {0}")]
    Envelope(#[from] saga_events::EnvelopeError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Dead-letter spill failed
    #[error("Dead-letter error: {0}")]
    DeadLetter(#[from] dead_letter::DeadLetterError),

    /// Generic error with context
    #[error("Outbox error: {0}")]
    Other(#[from] anyhow::Error),
}
