//! Typed payloads for every saga event, and the closed sum type that maps
//! each one to its wire name and exchange.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topology;

/// Emitted by the booking service when a booking is created `PENDING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCreated {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub room_id: String,
    pub amount: Decimal,
    pub quantity: i32,
}

/// Emitted by the inventory service when stock was reserved for a booking.
/// Carries the booking amount so the payment step can charge from the event
/// alone; the saga never does a synchronous cross-service lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    pub reservation_id: Uuid,
    pub booking_id: Uuid,
    pub item_id: String,
    pub quantity: i32,
    pub amount: Decimal,
}

/// Business failure: the reservation could not be made.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservationFailed {
    pub booking_id: Uuid,
    pub item_id: String,
    pub reason: String,
}

/// Emitted whenever reserved stock is handed back (compensation or expiry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReleased {
    pub reservation_id: Uuid,
    pub booking_id: Uuid,
    pub item_id: String,
    pub quantity: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub transaction_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    /// Absent when the failure happened before a payment row existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    pub booking_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingCancelled {
    pub booking_id: Uuid,
    pub reason: String,
}

/// All events the saga can emit. Each variant knows its wire name and the
/// exchange it is published to; consumers dispatch on the envelope's
/// `eventName` against these constants.
#[derive(Debug, Clone)]
pub enum SagaEvent {
    BookingCreated(BookingCreated),
    InventoryReserved(InventoryReserved),
    InventoryReservationFailed(InventoryReservationFailed),
    InventoryReleased(InventoryReleased),
    PaymentSucceeded(PaymentSucceeded),
    PaymentFailed(PaymentFailed),
    BookingCancelled(BookingCancelled),
}

pub mod names {
    pub const BOOKING_CREATED: &str = "BookingCreated";
    pub const INVENTORY_RESERVED: &str = "InventoryReserved";
    pub const INVENTORY_RESERVATION_FAILED: &str = "InventoryReservationFailed";
    pub const INVENTORY_RELEASED: &str = "InventoryReleased";
    pub const PAYMENT_SUCCEEDED: &str = "PaymentSucceeded";
    pub const PAYMENT_FAILED: &str = "PaymentFailed";
    pub const BOOKING_CANCELLED: &str = "BookingCancelled";
}

impl SagaEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SagaEvent::BookingCreated(_) => names::BOOKING_CREATED,
            SagaEvent::InventoryReserved(_) => names::INVENTORY_RESERVED,
            SagaEvent::InventoryReservationFailed(_) => names::INVENTORY_RESERVATION_FAILED,
            SagaEvent::InventoryReleased(_) => names::INVENTORY_RELEASED,
            SagaEvent::PaymentSucceeded(_) => names::PAYMENT_SUCCEEDED,
            SagaEvent::PaymentFailed(_) => names::PAYMENT_FAILED,
            SagaEvent::BookingCancelled(_) => names::BOOKING_CANCELLED,
        }
    }

    /// The exchange this event is published to.
    pub fn exchange(&self) -> &'static str {
        match self {
            SagaEvent::BookingCreated(_) => topology::exchanges::BOOKING_CREATED,
            SagaEvent::InventoryReserved(_) => topology::exchanges::INVENTORY_RESERVED,
            SagaEvent::InventoryReservationFailed(_) => {
                topology::exchanges::INVENTORY_RESERVATION_FAILED
            }
            SagaEvent::InventoryReleased(_) => topology::exchanges::INVENTORY_RELEASED,
            SagaEvent::PaymentSucceeded(_) => topology::exchanges::PAYMENT_SUCCEEDED,
            SagaEvent::PaymentFailed(_) => topology::exchanges::PAYMENT_FAILED,
            SagaEvent::BookingCancelled(_) => topology::exchanges::BOOKING_CANCELLED,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            SagaEvent::BookingCreated(p) => serde_json::to_value(p),
            SagaEvent::InventoryReserved(p) => serde_json::to_value(p),
            SagaEvent::InventoryReservationFailed(p) => serde_json::to_value(p),
            SagaEvent::InventoryReleased(p) => serde_json::to_value(p),
            SagaEvent::PaymentSucceeded(p) => serde_json::to_value(p),
            SagaEvent::PaymentFailed(p) => serde_json::to_value(p),
            SagaEvent::BookingCancelled(p) => serde_json::to_value(p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_map_to_exchanges() {
        let cases = [
            (names::BOOKING_CREATED, "booking_created"),
            (names::INVENTORY_RESERVED, "inventory_reserved"),
            (
                names::INVENTORY_RESERVATION_FAILED,
                "inventory_reservation_failed",
            ),
            (names::INVENTORY_RELEASED, "inventory_released"),
            (names::PAYMENT_SUCCEEDED, "payment_succeeded"),
            (names::PAYMENT_FAILED, "payment_failed"),
            (names::BOOKING_CANCELLED, "booking_cancelled"),
        ];
        for (name, exchange) in cases {
            assert_eq!(topology::exchange_for(name), Some(exchange));
        }
        assert_eq!(topology::exchange_for("NoSuchEvent"), None);
    }

    #[test]
    fn test_payment_failed_payload_id_is_optional_on_the_wire() {
        let without_id = PaymentFailed {
            payment_id: None,
            booking_id: Uuid::new_v4(),
            reason: "no stock".to_string(),
        };
        let json = serde_json::to_value(&without_id).unwrap();
        assert!(json.get("paymentId").is_none());

        let parsed: PaymentFailed =
            serde_json::from_value(serde_json::json!({
                "bookingId": without_id.booking_id,
                "reason": "no stock",
            }))
            .unwrap();
        assert!(parsed.payment_id.is_none());
    }
}
