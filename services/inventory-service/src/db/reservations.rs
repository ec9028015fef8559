//! Serialized reservation engine.
//!
//! Every quantity mutation happens inside a transaction that holds a
//! `FOR UPDATE` row lock on the inventory item, so concurrent
//! `BookingCreated` deliveries cannot overbook. One reservation per booking
//! is enforced by the unique index on `booking_id`; a concurrent duplicate
//! that loses the race rolls back and returns the winner's row unchanged.
//! Insufficient stock is a business outcome, not an error: the failure event
//! is written to the outbox and the transaction commits.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use saga_events::{
    events::{InventoryReleased, InventoryReservationFailed, InventoryReserved},
    SagaEvent,
};
use transactional_outbox::{enqueue, SqlxOutboxRepository};

use crate::domain::{InventoryItem, InventoryReservation, ReservationStatus};
use crate::error::{AppError, AppResult};

const RESERVATION_COLUMNS: &str = "reservation_id, booking_id, item_id, quantity, status, \
     correlation_id, expires_at, confirmed_at, released_at, release_reason, created_at, updated_at";

/// Outcome of a reserve call. All three are successful handler outcomes;
/// only infrastructure faults surface as errors.
#[derive(Debug)]
pub enum ReserveOutcome {
    Reserved(InventoryReservation),
    /// Duplicate delivery: the existing reservation, returned unchanged
    AlreadyReserved(InventoryReservation),
    /// Business failure (insufficient stock, unknown item); the failure
    /// event is already in the outbox
    Rejected { reason: String },
}

#[derive(Clone)]
pub struct InventoryStore {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
    ttl: chrono::Duration,
}

impl InventoryStore {
    pub fn new(pool: PgPool, outbox: Arc<SqlxOutboxRepository>, ttl: chrono::Duration) -> Self {
        Self { pool, outbox, ttl }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Reserve stock for a booking.
    pub async fn reserve(
        &self,
        booking_id: Uuid,
        item_id: &str,
        quantity: i32,
        amount: Decimal,
        correlation_id: Uuid,
    ) -> AppResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await?;

        // Idempotency pivot: any existing reservation for this booking is
        // returned unchanged, whatever its status.
        if let Some(existing) = find_by_booking_tx(&mut tx, booking_id).await? {
            tx.commit().await?;
            info!(
                booking_id = %booking_id,
                reservation_id = %existing.reservation_id,
                status = %existing.status,
                "Duplicate reserve, returning existing reservation"
            );
            return Ok(ReserveOutcome::AlreadyReserved(existing));
        }

        let item = lock_item(&mut tx, item_id).await?;

        let rejection = match &item {
            None => Some(format!("Unknown inventory item {}", item_id)),
            Some(item) if !item.can_reserve(quantity) => Some(format!(
                "Insufficient inventory for {}: requested {}, available {}",
                item_id, quantity, item.available_quantity
            )),
            Some(_) => None,
        };

        if let Some(reason) = rejection {
            // Business failure: emit the failure event and commit. No error.
            enqueue(
                &mut tx,
                self.outbox.as_ref(),
                &SagaEvent::InventoryReservationFailed(InventoryReservationFailed {
                    booking_id,
                    item_id: item_id.to_string(),
                    reason: reason.clone(),
                }),
                correlation_id,
            )
            .await?;
            tx.commit().await?;
            warn!(booking_id = %booking_id, item_id = %item_id, reason = %reason, "Reservation rejected");
            return Ok(ReserveOutcome::Rejected { reason });
        }

        sqlx::query(
            r#"
            UPDATE inventory_items
            SET available_quantity = available_quantity - $2,
                reserved_quantity = reserved_quantity + $2,
                updated_at = NOW()
            WHERE item_id = $1
            "#,
        )
        .bind(item_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        let reservation_id = Uuid::new_v4();
        let expires_at = Utc::now() + self.ttl;

        let inserted = sqlx::query(
            r#"
            INSERT INTO inventory_reservations (
                reservation_id, booking_id, item_id, quantity, status,
                correlation_id, expires_at
            ) VALUES ($1, $2, $3, $4, 'RESERVED', $5, $6)
            "#,
        )
        .bind(reservation_id)
        .bind(booking_id)
        .bind(item_id)
        .bind(quantity)
        .bind(correlation_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            // Lost a same-booking race: roll back the quantity change and
            // hand back the winner's reservation.
            if is_unique_violation(&e) {
                tx.rollback().await?;
                if let Some(existing) = self.find_by_booking(booking_id).await? {
                    info!(
                        booking_id = %booking_id,
                        reservation_id = %existing.reservation_id,
                        "Concurrent duplicate reserve, returning winner's reservation"
                    );
                    return Ok(ReserveOutcome::AlreadyReserved(existing));
                }
            }
            return Err(e.into());
        }

        enqueue(
            &mut tx,
            self.outbox.as_ref(),
            &SagaEvent::InventoryReserved(InventoryReserved {
                reservation_id,
                booking_id,
                item_id: item_id.to_string(),
                quantity,
                amount,
            }),
            correlation_id,
        )
        .await?;

        tx.commit().await?;

        info!(
            booking_id = %booking_id,
            reservation_id = %reservation_id,
            item_id = %item_id,
            quantity,
            "Stock reserved"
        );

        find_required(&self.pool, booking_id).await.map(ReserveOutcome::Reserved)
    }

    /// Release a reservation and restore quantities. Idempotent: missing or
    /// non-active reservations are left untouched.
    pub async fn release(
        &self,
        booking_id: Uuid,
        reason: &str,
        correlation_id: Uuid,
    ) -> AppResult<Option<InventoryReservation>> {
        self.release_with_status(booking_id, reason, correlation_id, ReservationStatus::Released)
            .await
    }

    async fn release_with_status(
        &self,
        booking_id: Uuid,
        reason: &str,
        correlation_id: Uuid,
        target: ReservationStatus,
    ) -> AppResult<Option<InventoryReservation>> {
        let mut tx = self.pool.begin().await?;

        let Some(reservation) = find_by_booking_for_update(&mut tx, booking_id).await? else {
            tx.commit().await?;
            info!(booking_id = %booking_id, "No reservation to release");
            return Ok(None);
        };

        if !reservation.is_active() {
            tx.commit().await?;
            info!(
                booking_id = %booking_id,
                status = %reservation.status,
                "Reservation not active, release is a no-op"
            );
            return Ok(None);
        }

        release_locked(&mut tx, self.outbox.as_ref(), &reservation, reason, correlation_id, target)
            .await?;

        tx.commit().await?;

        info!(
            booking_id = %booking_id,
            reservation_id = %reservation.reservation_id,
            reason = %reason,
            "Reservation released, quantities restored"
        );

        find_required(&self.pool, booking_id).await.map(Some)
    }

    /// Transition RESERVED → CONFIRMED on payment success. Quantities stay
    /// decremented: confirmed stock is consumed. Idempotent.
    pub async fn confirm(
        &self,
        booking_id: Uuid,
        _correlation_id: Uuid,
    ) -> AppResult<Option<InventoryReservation>> {
        let mut tx = self.pool.begin().await?;

        let Some(reservation) = find_by_booking_for_update(&mut tx, booking_id).await? else {
            tx.commit().await?;
            warn!(booking_id = %booking_id, "No reservation to confirm");
            return Ok(None);
        };

        match reservation.status {
            ReservationStatus::Confirmed => {
                tx.commit().await?;
                return Ok(Some(reservation));
            }
            ReservationStatus::Reserved => {}
            ReservationStatus::Released | ReservationStatus::Expired => {
                tx.commit().await?;
                warn!(
                    booking_id = %booking_id,
                    status = %reservation.status,
                    "Late confirmation for inactive reservation, ignoring"
                );
                return Ok(None);
            }
        }

        sqlx::query(
            r#"
            UPDATE inventory_reservations
            SET status = 'CONFIRMED', confirmed_at = NOW(), updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            booking_id = %booking_id,
            reservation_id = %reservation.reservation_id,
            "Reservation confirmed"
        );

        find_required(&self.pool, booking_id).await.map(Some)
    }

    /// Release reservations whose TTL elapsed. Each batch runs in one local
    /// transaction; rows are transitioned to EXPIRED, quantities restored and
    /// `InventoryReleased` emitted under the reservation's correlation id.
    pub async fn release_expired(&self, limit: i64) -> AppResult<u32> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM inventory_reservations \
             WHERE status = 'RESERVED' AND expires_at < NOW() \
             ORDER BY expires_at ASC LIMIT $1 FOR UPDATE SKIP LOCKED",
            RESERVATION_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut released = 0u32;
        for row in &rows {
            let reservation = map_reservation(row)?;
            release_locked(
                &mut tx,
                self.outbox.as_ref(),
                &reservation,
                "Reservation expired",
                reservation.correlation_id,
                ReservationStatus::Expired,
            )
            .await?;
            released += 1;
        }

        tx.commit().await?;

        if released > 0 {
            info!(released, "Expired reservations released");
        }

        Ok(released)
    }

    pub async fn find_by_booking(&self, booking_id: Uuid) -> AppResult<Option<InventoryReservation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM inventory_reservations WHERE booking_id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_reservation).transpose()
    }
}

/// Shared release body; caller holds the row lock on the reservation.
async fn release_locked(
    tx: &mut Transaction<'_, Postgres>,
    outbox: &SqlxOutboxRepository,
    reservation: &InventoryReservation,
    reason: &str,
    correlation_id: Uuid,
    target: ReservationStatus,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE inventory_reservations
        SET status = $2, released_at = NOW(), release_reason = $3, updated_at = NOW()
        WHERE booking_id = $1
        "#,
    )
    .bind(reservation.booking_id)
    .bind(target.as_str())
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE inventory_items
        SET available_quantity = available_quantity + $2,
            reserved_quantity = reserved_quantity - $2,
            updated_at = NOW()
        WHERE item_id = $1
        "#,
    )
    .bind(&reservation.item_id)
    .bind(reservation.quantity)
    .execute(&mut **tx)
    .await?;

    enqueue(
        tx,
        outbox,
        &SagaEvent::InventoryReleased(InventoryReleased {
            reservation_id: reservation.reservation_id,
            booking_id: reservation.booking_id,
            item_id: reservation.item_id.clone(),
            quantity: reservation.quantity,
            reason: reason.to_string(),
        }),
        correlation_id,
    )
    .await?;

    Ok(())
}

async fn lock_item(
    tx: &mut Transaction<'_, Postgres>,
    item_id: &str,
) -> AppResult<Option<InventoryItem>> {
    let row = sqlx::query(
        "SELECT id, item_id, total_quantity, available_quantity, reserved_quantity, \
         created_at, updated_at FROM inventory_items WHERE item_id = $1 FOR UPDATE",
    )
    .bind(item_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref()
        .map(super::items::map_item)
        .transpose()
        .map_err(AppError::from)
}

async fn find_by_booking_tx(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> AppResult<Option<InventoryReservation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM inventory_reservations WHERE booking_id = $1",
        RESERVATION_COLUMNS
    ))
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(map_reservation).transpose()
}

async fn find_by_booking_for_update(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> AppResult<Option<InventoryReservation>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM inventory_reservations WHERE booking_id = $1 FOR UPDATE",
        RESERVATION_COLUMNS
    ))
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(map_reservation).transpose()
}

async fn find_required(pool: &PgPool, booking_id: Uuid) -> AppResult<InventoryReservation> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM inventory_reservations WHERE booking_id = $1",
        RESERVATION_COLUMNS
    ))
    .bind(booking_id)
    .fetch_one(pool)
    .await?;

    map_reservation(&row)
}

fn map_reservation(row: &PgRow) -> AppResult<InventoryReservation> {
    let status: String = row.try_get("status")?;
    Ok(InventoryReservation {
        reservation_id: row.try_get("reservation_id")?,
        booking_id: row.try_get("booking_id")?,
        item_id: row.try_get("item_id")?,
        quantity: row.try_get("quantity")?,
        status: status
            .parse()
            .map_err(|e: String| AppError::Internal(e))?,
        correlation_id: row.try_get("correlation_id")?,
        expires_at: row.try_get("expires_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        released_at: row.try_get("released_at")?,
        release_reason: row.try_get("release_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
