//! Error types for the broker adapter.

use std::time::Duration;
use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// Broker unreachable or the link dropped
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// Channel or topology declaration failed
    #[error("Channel setup failed: {0}")]
    Channel(String),

    /// Publish was not accepted by the broker
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Broker did not confirm within the publish envelope
    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// Broker negatively acknowledged the message
    #[error("Broker rejected message (nack)")]
    Nacked,
}

impl BusError {
    /// Connection-class faults are the only ones the retry pipeline
    /// re-attempts; everything else surfaces immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_) | BusError::PublishTimeout(_)
        )
    }
}

/// Faults that warrant reconnecting: broker unreachable, socket errors,
/// protocol-level connection failures, stale connection/channel state.
pub fn is_connection_error(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::IOError(_)
            | lapin::Error::ProtocolError(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::InvalidChannelState(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_connection_class() {
        let err = lapin::Error::IOError(std::sync::Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(is_connection_error(&err));
    }

    #[test]
    fn test_transient_classification() {
        assert!(BusError::Connection("down".into()).is_transient());
        assert!(BusError::PublishTimeout(Duration::from_secs(10)).is_transient());
        assert!(!BusError::Nacked.is_transient());
        assert!(!BusError::Channel("bad".into()).is_transient());
    }
}
