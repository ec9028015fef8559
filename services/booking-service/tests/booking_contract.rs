//! Wire-contract tests for the booking representation and the trusted
//! identity header.

use actix_web::test::TestRequest;
use booking_service::domain::{Booking, BookingStatus};
use booking_service::handlers::bookings::{user_id_from, USER_ID_HEADER};
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

fn sample_booking(status: BookingStatus) -> Booking {
    Booking {
        booking_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        room_id: "ROOM-101".to_string(),
        amount: Decimal::new(50000, 2),
        status,
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        confirmed_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    }
}

#[test]
fn booking_serializes_camel_case_with_screaming_status() {
    let booking = sample_booking(BookingStatus::Pending);
    let json = serde_json::to_value(&booking).unwrap();

    assert_eq!(json["roomId"], "ROOM-101");
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["amount"], "500.00");
    assert!(json.get("bookingId").is_some());
    // The correlation id is internal plumbing, not part of the API surface.
    assert!(json.get("correlationId").is_none());
}

#[test]
fn cancelled_booking_exposes_reason() {
    let mut booking = sample_booking(BookingStatus::Cancelled);
    booking.cancellation_reason = Some("Payment failed: card declined".to_string());
    let json = serde_json::to_value(&booking).unwrap();

    assert_eq!(json["status"], "CANCELLED");
    assert_eq!(json["cancellationReason"], "Payment failed: card declined");
}

#[test]
fn user_id_header_is_required_and_must_be_a_uuid() {
    let user = Uuid::new_v4();

    let req = TestRequest::default()
        .insert_header((USER_ID_HEADER, user.to_string()))
        .to_http_request();
    assert_eq!(user_id_from(&req).unwrap(), user);

    let missing = TestRequest::default().to_http_request();
    assert!(user_id_from(&missing).is_err());

    let garbage = TestRequest::default()
        .insert_header((USER_ID_HEADER, "not-a-uuid"))
        .to_http_request();
    assert!(user_id_from(&garbage).is_err());
}

#[test]
fn ownership_check_matches_user() {
    let booking = sample_booking(BookingStatus::Pending);
    assert!(booking.is_owned_by(booking.user_id));
    assert!(!booking.is_owned_by(Uuid::new_v4()));
}
