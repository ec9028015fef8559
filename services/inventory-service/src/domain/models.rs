//! Inventory domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stock line identified by its business key (e.g. `ROOM-101`).
///
/// Invariant at every commit: `available + reserved = total`, both
/// non-negative. Quantities are mutated only inside the serialized
/// reservation path (row lock on this record).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    #[serde(skip)]
    pub id: Uuid,
    pub item_id: String,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn can_reserve(&self, quantity: i32) -> bool {
        quantity > 0 && self.available_quantity >= quantity
    }

    pub fn invariant_holds(&self) -> bool {
        self.available_quantity >= 0
            && self.reserved_quantity >= 0
            && self.available_quantity + self.reserved_quantity == self.total_quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Confirmed,
    Released,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RESERVED" => Ok(ReservationStatus::Reserved),
            "CONFIRMED" => Ok(ReservationStatus::Confirmed),
            "RELEASED" => Ok(ReservationStatus::Released),
            "EXPIRED" => Ok(ReservationStatus::Expired),
            other => Err(format!("Unknown reservation status: {}", other)),
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reservation per booking; the unique `booking_id` is the idempotency
/// key for duplicate `BookingCreated` deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReservation {
    pub reservation_id: Uuid,
    pub booking_id: Uuid,
    pub item_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
    #[serde(skip)]
    pub correlation_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryReservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_can_reserve_boundaries() {
        // Exactly enough stock succeeds; one short fails.
        assert!(item(1, 1, 0).can_reserve(1));
        assert!(!item(1, 0, 1).can_reserve(1));
        assert!(item(5, 3, 2).can_reserve(3));
        assert!(!item(5, 3, 2).can_reserve(4));
        // Non-positive quantities are never reservable.
        assert!(!item(5, 5, 0).can_reserve(0));
        assert!(!item(5, 5, 0).can_reserve(-1));
    }

    #[test]
    fn test_invariant() {
        assert!(item(3, 2, 1).invariant_holds());
        assert!(!item(3, 3, 1).invariant_holds());
        assert!(item(0, 0, 0).invariant_holds());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ReservationStatus::Reserved,
            ReservationStatus::Confirmed,
            ReservationStatus::Released,
            ReservationStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>(), Ok(status));
        }
        assert!("UNKNOWN".parse::<ReservationStatus>().is_err());
    }
}
