//! Wire-contract and gateway-simulation tests for the payment service.

use chrono::Utc;
use payment_service::domain::{Payment, PaymentStatus};
use payment_service::gateway::{ChargeOutcome, PaymentGateway, SimulatedGateway};
use rust_decimal::Decimal;
use uuid::Uuid;

fn sample_payment(status: PaymentStatus, retry_count: i32) -> Payment {
    Payment {
        payment_id: Uuid::new_v4(),
        booking_id: Uuid::new_v4(),
        amount: Decimal::new(50000, 2),
        method: "CARD".to_string(),
        status,
        transaction_id: None,
        error_message: None,
        retry_count,
        last_retry_at: None,
        correlation_id: Uuid::new_v4(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        processed_at: None,
    }
}

#[test]
fn payment_serializes_camel_case() {
    let mut payment = sample_payment(PaymentStatus::Success, 0);
    payment.transaction_id = Some("txn_abc".to_string());
    let json = serde_json::to_value(&payment).unwrap();

    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["transactionId"], "txn_abc");
    assert_eq!(json["retryCount"], 0);
    assert_eq!(json["amount"], "500.00");
    assert!(json.get("correlationId").is_none());
}

#[test]
fn permanently_failed_payment_is_a_sink() {
    let payment = sample_payment(PaymentStatus::PermanentlyFailed, 3);
    assert!(payment.status.is_terminal());
    assert!(!payment.is_retryable());
}

#[test]
fn dead_letter_snapshot_matches_spec_shape() {
    let mut payment = sample_payment(PaymentStatus::Failed, 3);
    payment.error_message = Some("declined".to_string());
    let snapshot = payment.snapshot();

    assert_eq!(snapshot["retryCount"], 3);
    assert_eq!(snapshot["errorMessage"], "declined");
    assert_eq!(snapshot["bookingId"], payment.booking_id.to_string());
}

#[tokio::test]
async fn gateway_is_deterministic_at_the_extremes() {
    let always = SimulatedGateway::new(1.0);
    let never = SimulatedGateway::new(0.0);
    let booking = Uuid::new_v4();
    let amount = Decimal::new(50000, 2);

    for _ in 0..10 {
        assert!(matches!(
            always.charge(booking, amount, "CARD").await.unwrap(),
            ChargeOutcome::Approved { .. }
        ));
        assert!(matches!(
            never.charge(booking, amount, "CARD").await.unwrap(),
            ChargeOutcome::Declined { .. }
        ));
    }
}
