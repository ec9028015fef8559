//! Saga event handlers for the booking service.
//!
//! Confirm on payment success, cancel on payment or reservation failure.
//! Idempotency rides on the terminal-state checks in the store: duplicates
//! and late events return without effect and the delivery is acked.

use async_trait::async_trait;

use consumer_runtime::EventHandler;
use saga_events::{
    events::{InventoryReservationFailed, PaymentFailed, PaymentSucceeded},
    EventEnvelope,
};

use crate::db::BookingStore;

/// `PaymentSucceeded` → confirm the booking.
pub struct PaymentSucceededHandler {
    store: BookingStore,
}

impl PaymentSucceededHandler {
    pub fn new(store: BookingStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for PaymentSucceededHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: PaymentSucceeded = envelope.decode()?;
        self.store.confirm(event.booking_id).await?;
        Ok(())
    }
}

/// `PaymentFailed` → cancel the booking.
pub struct PaymentFailedHandler {
    store: BookingStore,
}

impl PaymentFailedHandler {
    pub fn new(store: BookingStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for PaymentFailedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: PaymentFailed = envelope.decode()?;
        self.store
            .cancel(
                event.booking_id,
                &format!("Payment failed: {}", event.reason),
                envelope.correlation_id,
            )
            .await?;
        Ok(())
    }
}

/// `InventoryReservationFailed` → cancel the booking.
pub struct InventoryReservationFailedHandler {
    store: BookingStore,
}

impl InventoryReservationFailedHandler {
    pub fn new(store: BookingStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for InventoryReservationFailedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: InventoryReservationFailed = envelope.decode()?;
        self.store
            .cancel(
                event.booking_id,
                &format!("Inventory reservation failed: {}", event.reason),
                envelope.correlation_id,
            )
            .await?;
        Ok(())
    }
}
