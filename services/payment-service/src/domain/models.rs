//! Payment domain model.
//!
//! One payment row per booking (`booking_id` unique); retries mutate the
//! same row in place. `retry_count` counts *manual* retries only — the
//! initial consumer-driven attempt leaves it untouched. `SUCCESS` and
//! `PERMANENTLY_FAILED` are sinks.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    PermanentlyFailed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::PermanentlyFailed => "PERMANENTLY_FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::PermanentlyFailed
        )
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "PERMANENTLY_FAILED" => Ok(PaymentStatus::PermanentlyFailed),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub amount: Decimal,
    pub method: String,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub correlation_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Only FAILED rows accept a manual retry.
    pub fn is_retryable(&self) -> bool {
        self.status == PaymentStatus::Failed
    }

    /// Snapshot used as the dead-letter payload when retries run out.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "paymentId": self.payment_id,
            "bookingId": self.booking_id,
            "amount": self.amount,
            "method": self.method,
            "status": self.status,
            "errorMessage": self.error_message,
            "retryCount": self.retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: PaymentStatus, retry_count: i32) -> Payment {
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
    fn test_terminal_states() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::PermanentlyFailed.is_terminal());
    }

    #[test]
    fn test_only_failed_is_retryable() {
        assert!(payment(PaymentStatus::Failed, 0).is_retryable());
        assert!(!payment(PaymentStatus::Pending, 0).is_retryable());
        assert!(!payment(PaymentStatus::Success, 0).is_retryable());
        assert!(!payment(PaymentStatus::PermanentlyFailed, 3).is_retryable());
    }

    #[test]
    fn test_snapshot_carries_retry_count() {
        let snapshot = payment(PaymentStatus::Failed, 3).snapshot();
        assert_eq!(snapshot["retryCount"], 3);
        assert_eq!(snapshot["status"], "FAILED");
        assert_eq!(snapshot["amount"], "500.00");
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Success,
            PaymentStatus::Failed,
            PaymentStatus::PermanentlyFailed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>(), Ok(status));
        }
    }
}
