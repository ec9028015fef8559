//! Saga event handlers for the inventory service.
//!
//! All handlers are idempotent through the reservation engine: duplicate
//! deliveries hit the unique `booking_id` pivot or a terminal status and
//! become no-ops. Business outcomes (insufficient stock) emit failure events
//! and return `Ok`; only infrastructure faults return `Err` and enter the
//! runtime's retry pipeline.

use async_trait::async_trait;
use tracing::info;

use consumer_runtime::EventHandler;
use saga_events::{
    events::{BookingCreated, PaymentFailed, PaymentSucceeded},
    EventEnvelope,
};

use crate::db::{InventoryStore, ReserveOutcome};

/// `BookingCreated` → reserve stock for the booking.
pub struct BookingCreatedHandler {
    store: InventoryStore,
}

impl BookingCreatedHandler {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for BookingCreatedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: BookingCreated = envelope.decode()?;

        let outcome = self
            .store
            .reserve(
                event.booking_id,
                &event.room_id,
                event.quantity,
                event.amount,
                envelope.correlation_id,
            )
            .await?;

        match outcome {
            ReserveOutcome::Reserved(reservation) => {
                info!(reservation_id = %reservation.reservation_id, "Reservation created");
            }
            ReserveOutcome::AlreadyReserved(reservation) => {
                info!(reservation_id = %reservation.reservation_id, "Duplicate delivery, no-op");
            }
            ReserveOutcome::Rejected { reason } => {
                info!(reason = %reason, "Reservation rejected, failure event emitted");
            }
        }

        Ok(())
    }
}

/// `PaymentSucceeded` → confirm the reservation; stock stays consumed.
pub struct PaymentSucceededHandler {
    store: InventoryStore,
}

impl PaymentSucceededHandler {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for PaymentSucceededHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: PaymentSucceeded = envelope.decode()?;
        self.store
            .confirm(event.booking_id, envelope.correlation_id)
            .await?;
        Ok(())
    }
}

/// `PaymentFailed` → compensate by releasing the reservation.
pub struct PaymentFailedHandler {
    store: InventoryStore,
}

impl PaymentFailedHandler {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for PaymentFailedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: PaymentFailed = envelope.decode()?;
        self.store
            .release(
                event.booking_id,
                &format!("Payment failed: {}", event.reason),
                envelope.correlation_id,
            )
            .await?;
        Ok(())
    }
}
