//! Saga event handler for the payment service.
//!
//! Payment follows a successful reservation: the consumer sits on
//! `InventoryReserved` and charges from the event alone. Duplicate
//! deliveries hit the `booking_id` unique pivot inside the store and return
//! the existing record without a second charge.

use async_trait::async_trait;
use tracing::info;

use consumer_runtime::EventHandler;
use saga_events::{events::InventoryReserved, EventEnvelope};

use crate::db::PaymentStore;

const DEFAULT_METHOD: &str = "CARD";

pub struct InventoryReservedHandler {
    store: PaymentStore,
}

impl InventoryReservedHandler {
    pub fn new(store: PaymentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for InventoryReservedHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()> {
        let event: InventoryReserved = envelope.decode()?;

        let payment = self
            .store
            .process(
                event.booking_id,
                event.amount,
                DEFAULT_METHOD,
                envelope.correlation_id,
            )
            .await?;

        info!(
            booking_id = %event.booking_id,
            payment_id = %payment.payment_id,
            status = %payment.status,
            "Payment processed"
        );

        Ok(())
    }
}
