//! Event schema for the booking saga.
//!
//! Defines the wire envelope every broker message carries, the typed payloads
//! for each saga event, and the static broker topology (exchanges, consumer
//! queues, dead-letter queues). Dispatch is a closed sum type plus a static
//! name registry; there is no runtime reflection.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

pub mod events;
pub mod topology;

pub use events::{
    BookingCancelled, BookingCreated, InventoryReleased, InventoryReservationFailed,
    InventoryReserved, PaymentFailed, PaymentSucceeded, SagaEvent,
};
pub use topology::{dlq_name, exchange_for, queue_name, QueueBinding};

/// Wire envelope carried by every saga event.
///
/// `event_id` is the consumer-side idempotency key; `correlation_id` is the
/// tracing key, copied unchanged through every event of a saga instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_name: String,
    pub correlation_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Failed to serialize event payload: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Failed to decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Envelope data does not match {expected}: {source}")]
    Payload {
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl EventEnvelope {
    /// Wrap a saga event, stamping a fresh event id and the current instant.
    /// The correlation id is copied from the caller, never computed.
    pub fn wrap(event: &SagaEvent, correlation_id: Uuid) -> Result<Self, EnvelopeError> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_name: event.event_name().to_string(),
            correlation_id,
            timestamp: Utc::now(),
            data: event.to_value().map_err(EnvelopeError::Serialize)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Serialize)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)
    }

    /// Decode the event-specific body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_value(self.data.clone()).map_err(|e| EnvelopeError::Payload {
            expected: std::any::type_name::<T>(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_envelope_wire_shape_is_camel_case() {
        let event = SagaEvent::BookingCreated(BookingCreated {
            booking_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            room_id: "ROOM-101".to_string(),
            amount: Decimal::new(50000, 2),
            quantity: 1,
        });
        let correlation = Uuid::new_v4();
        let envelope = EventEnvelope::wrap(&event, correlation).unwrap();

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("eventId").is_some());
        assert_eq!(json["eventName"], "BookingCreated");
        assert_eq!(json["correlationId"], correlation.to_string());
        assert!(json["data"].get("bookingId").is_some());
        assert_eq!(json["data"]["roomId"], "ROOM-101");
        assert_eq!(json["data"]["amount"], "500.00");
    }

    #[test]
    fn test_envelope_roundtrip_and_decode() {
        let booking_id = Uuid::new_v4();
        let event = SagaEvent::PaymentFailed(PaymentFailed {
            payment_id: Some(Uuid::new_v4()),
            booking_id,
            reason: "Card declined".to_string(),
        });
        let envelope = EventEnvelope::wrap(&event, Uuid::new_v4()).unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let parsed = EventEnvelope::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.event_id, envelope.event_id);
        assert_eq!(parsed.event_name, "PaymentFailed");

        let payload: PaymentFailed = parsed.decode().unwrap();
        assert_eq!(payload.booking_id, booking_id);
        assert_eq!(payload.reason, "Card declined");
    }

    #[test]
    fn test_from_bytes_rejects_malformed_payload() {
        assert!(EventEnvelope::from_bytes(b"not json").is_err());
        // Valid JSON but missing required envelope fields is still poison.
        assert!(EventEnvelope::from_bytes(b"{\"eventName\":\"X\"}").is_err());
    }
}
