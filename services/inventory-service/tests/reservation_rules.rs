//! Reservation rules the engine enforces, exercised on the pure domain
//! layer, plus the saga wiring this service depends on.

use chrono::Utc;
use inventory_service::domain::{InventoryItem, InventoryReservation, ReservationStatus};
use saga_events::topology::{self, services};
use uuid::Uuid;

fn item(total: i32, available: i32, reserved: i32) -> InventoryItem {
    InventoryItem {
        id: Uuid::new_v4(),
        item_id: "ROOM-101".to_string(),
        total_quantity: total,
        available_quantity: available,
        reserved_quantity: reserved,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn exact_stock_reserves_one_short_does_not() {
    // availableQuantity = quantity succeeds
    assert!(item(2, 2, 0).can_reserve(2));
    // availableQuantity = quantity - 1 must reject
    assert!(!item(2, 1, 1).can_reserve(2));
}

#[test]
fn quantity_invariant_is_checked_per_state() {
    // A release restores the invariant: available + reserved = total.
    let before = item(1, 0, 1);
    assert!(before.invariant_holds());
    let after = item(1, 1, 0);
    assert!(after.invariant_holds());
}

#[test]
fn only_reserved_rows_are_active() {
    let mut reservation = InventoryReservation {
        reservation_id: Uuid::new_v4(),
        booking_id: Uuid::new_v4(),
        item_id: "ROOM-101".to_string(),
        quantity: 1,
        status: ReservationStatus::Reserved,
        correlation_id: Uuid::new_v4(),
        expires_at: Utc::now() + chrono::Duration::minutes(15),
        confirmed_at: None,
        released_at: None,
        release_reason: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    assert!(reservation.is_active());

    for status in [
        ReservationStatus::Confirmed,
        ReservationStatus::Released,
        ReservationStatus::Expired,
    ] {
        reservation.status = status;
        assert!(!reservation.is_active());
    }
}

#[test]
fn reservation_serializes_camel_case() {
    let reservation = InventoryReservation {
        reservation_id: Uuid::new_v4(),
        booking_id: Uuid::new_v4(),
        item_id: "ROOM-101".to_string(),
        quantity: 1,
        status: ReservationStatus::Released,
        correlation_id: Uuid::new_v4(),
        expires_at: Utc::now(),
        confirmed_at: None,
        released_at: Some(Utc::now()),
        release_reason: Some("Payment failed: card declined".to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let json = serde_json::to_value(&reservation).unwrap();
    assert_eq!(json["status"], "RELEASED");
    assert_eq!(json["releaseReason"], "Payment failed: card declined");
    assert!(json.get("bookingId").is_some());
}

#[test]
fn this_service_consumes_three_saga_events() {
    let bindings = topology::bindings_for(services::INVENTORY);
    let exchanges: Vec<_> = bindings.iter().map(|b| b.exchange).collect();

    assert_eq!(bindings.len(), 3);
    assert!(exchanges.contains(&topology::exchanges::BOOKING_CREATED));
    assert!(exchanges.contains(&topology::exchanges::PAYMENT_SUCCEEDED));
    assert!(exchanges.contains(&topology::exchanges::PAYMENT_FAILED));
}
