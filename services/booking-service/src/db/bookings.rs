//! Booking repository and state machine.
//!
//! Every transition commits in the same local transaction as its outbox
//! event. Transitions are idempotent: re-applying the same transition is a
//! no-op, and a transition against the other terminal state is logged and
//! ignored so the delivery can be acknowledged.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use saga_events::{
    events::{BookingCancelled, BookingCreated},
    SagaEvent,
};
use transactional_outbox::{enqueue, SqlxOutboxRepository};

use crate::domain::{Booking, BookingStatus};
use crate::error::{AppError, AppResult};

const BOOKING_COLUMNS: &str = "booking_id, user_id, room_id, amount, status, correlation_id, \
     created_at, updated_at, confirmed_at, cancelled_at, cancellation_reason";

#[derive(Clone)]
pub struct BookingStore {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
}

impl BookingStore {
    pub fn new(pool: PgPool, outbox: Arc<SqlxOutboxRepository>) -> Self {
        Self { pool, outbox }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a `PENDING` booking and its `BookingCreated` outbox row in one
    /// transaction. The fresh correlation id follows the saga end to end.
    pub async fn create(
        &self,
        user_id: Uuid,
        room_id: &str,
        amount: Decimal,
    ) -> AppResult<Booking> {
        let booking_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, user_id, room_id, amount, status, correlation_id
            ) VALUES ($1, $2, $3, $4, 'PENDING', $5)
            "#,
        )
        .bind(booking_id)
        .bind(user_id)
        .bind(room_id)
        .bind(amount)
        .bind(correlation_id)
        .execute(&mut *tx)
        .await?;

        enqueue(
            &mut tx,
            self.outbox.as_ref(),
            &SagaEvent::BookingCreated(BookingCreated {
                booking_id,
                user_id,
                room_id: room_id.to_string(),
                amount,
                quantity: 1,
            }),
            correlation_id,
        )
        .await?;

        tx.commit().await?;

        info!(
            booking_id = %booking_id,
            correlation_id = %correlation_id,
            room_id = %room_id,
            "Booking created"
        );

        self.find_required(booking_id).await
    }

    pub async fn find(&self, booking_id: Uuid) -> AppResult<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM bookings WHERE booking_id = $1",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_booking).transpose()
    }

    /// `PENDING → CONFIRMED`. No-op when already confirmed; a cancelled
    /// booking ignores the late event.
    pub async fn confirm(&self, booking_id: Uuid) -> AppResult<Option<Booking>> {
        let mut tx = self.pool.begin().await?;

        let Some(booking) = find_for_update(&mut tx, booking_id).await? else {
            tx.commit().await?;
            warn!(booking_id = %booking_id, "No booking to confirm");
            return Ok(None);
        };

        match booking.status {
            BookingStatus::Confirmed => {
                tx.commit().await?;
                return Ok(Some(booking));
            }
            BookingStatus::Cancelled => {
                tx.commit().await?;
                warn!(booking_id = %booking_id, "Late confirmation for cancelled booking, ignoring");
                return Ok(None);
            }
            BookingStatus::Pending => {}
        }

        sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'CONFIRMED', confirmed_at = NOW(), updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(booking_id = %booking_id, "Booking confirmed");

        self.find_required(booking_id).await.map(Some)
    }

    /// `PENDING → CANCELLED`, emitting `BookingCancelled`. No-op when
    /// already cancelled; a confirmed booking ignores the late event.
    pub async fn cancel(
        &self,
        booking_id: Uuid,
        reason: &str,
        correlation_id: Uuid,
    ) -> AppResult<Option<Booking>> {
        let mut tx = self.pool.begin().await?;

        let Some(booking) = find_for_update(&mut tx, booking_id).await? else {
            tx.commit().await?;
            warn!(booking_id = %booking_id, "No booking to cancel");
            return Ok(None);
        };

        match booking.status {
            BookingStatus::Cancelled => {
                tx.commit().await?;
                return Ok(Some(booking));
            }
            BookingStatus::Confirmed => {
                tx.commit().await?;
                warn!(booking_id = %booking_id, "Late cancellation for confirmed booking, ignoring");
                return Ok(None);
            }
            BookingStatus::Pending => {}
        }

        sqlx::query(
            r#"
            UPDATE bookings
            SET status = 'CANCELLED', cancelled_at = NOW(),
                cancellation_reason = $2, updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(booking_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        enqueue(
            &mut tx,
            self.outbox.as_ref(),
            &SagaEvent::BookingCancelled(BookingCancelled {
                booking_id,
                reason: reason.to_string(),
            }),
            correlation_id,
        )
        .await?;

        tx.commit().await?;

        info!(booking_id = %booking_id, reason = %reason, "Booking cancelled");

        self.find_required(booking_id).await.map(Some)
    }

    async fn find_required(&self, booking_id: Uuid) -> AppResult<Booking> {
        self.find(booking_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Booking {} missing after write", booking_id)))
    }
}

async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    booking_id: Uuid,
) -> AppResult<Option<Booking>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM bookings WHERE booking_id = $1 FOR UPDATE",
        BOOKING_COLUMNS
    ))
    .bind(booking_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(map_booking).transpose()
}

fn map_booking(row: &PgRow) -> AppResult<Booking> {
    let status: String = row.try_get("status")?;
    Ok(Booking {
        booking_id: row.try_get("booking_id")?,
        user_id: row.try_get("user_id")?,
        room_id: row.try_get("room_id")?,
        amount: row.try_get("amount")?,
        status: status.parse().map_err(|e: String| AppError::Internal(e))?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        confirmed_at: row.try_get("confirmed_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
    })
}
