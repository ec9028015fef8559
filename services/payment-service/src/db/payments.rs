//! Payment state machine and retry path.
//!
//! The `booking_id` unique index is the idempotency pivot: duplicate
//! `InventoryReserved` deliveries find the existing row and return it
//! unchanged. The external charge effect runs outside any transaction; its
//! outcome commits atomically with the outbox event that announces it.
//! Manual retries mutate the same row and terminate in PERMANENTLY_FAILED
//! plus a dead-letter deposit.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use dead_letter::{NewDeadLetter, SqlxDeadLetterStore};
use saga_events::{
    events::{PaymentFailed, PaymentSucceeded},
    SagaEvent,
};
use transactional_outbox::{enqueue, SqlxOutboxRepository};

use crate::domain::{Payment, PaymentStatus};
use crate::error::{AppError, AppResult};
use crate::gateway::{ChargeOutcome, PaymentGateway};

const PAYMENT_COLUMNS: &str = "payment_id, booking_id, amount, method, status, transaction_id, \
     error_message, retry_count, last_retry_at, correlation_id, created_at, updated_at, processed_at";

/// Outcome of a manual retry request.
#[derive(Debug)]
pub enum RetryOutcome {
    /// The effect ran again; the payment is SUCCESS or FAILED
    Retried(Payment),
    /// Retry budget exhausted (now or earlier); the record is returned
    /// without error, per the API contract
    PermanentlyFailed(Payment),
    /// Business-rule denial (successful or still-processing payment)
    Denied { payment: Payment, reason: String },
    NotFound,
}

#[derive(Clone)]
pub struct PaymentStore {
    pool: PgPool,
    outbox: Arc<SqlxOutboxRepository>,
    dead_letters: SqlxDeadLetterStore,
    gateway: Arc<dyn PaymentGateway>,
    max_retries: i32,
}

impl PaymentStore {
    pub fn new(
        pool: PgPool,
        outbox: Arc<SqlxOutboxRepository>,
        dead_letters: SqlxDeadLetterStore,
        gateway: Arc<dyn PaymentGateway>,
        max_retries: i32,
    ) -> Self {
        Self {
            pool,
            outbox,
            dead_letters,
            gateway,
            max_retries,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Process the payment for a booking (consumer-driven or operator pay).
    ///
    /// Duplicate guard: an existing terminal or FAILED row is returned
    /// unchanged — the manual retry endpoint owns FAILED rows. A PENDING row
    /// is resumed: the previous attempt crashed before recording the
    /// effect's outcome.
    pub async fn process(
        &self,
        booking_id: Uuid,
        amount: Decimal,
        method: &str,
        correlation_id: Uuid,
    ) -> AppResult<Payment> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, booking_id, amount, method, status, correlation_id
            ) VALUES ($1, $2, $3, $4, 'PENDING', $5)
            ON CONFLICT (booking_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .bind(amount)
        .bind(method)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let payment = self.find_required(booking_id).await?;

        if !inserted {
            match payment.status {
                PaymentStatus::Pending => {
                    info!(
                        booking_id = %booking_id,
                        "Resuming PENDING payment (previous attempt did not record an outcome)"
                    );
                }
                _ => {
                    info!(
                        booking_id = %booking_id,
                        status = %payment.status,
                        "Duplicate payment request, returning existing record"
                    );
                    return Ok(payment);
                }
            }
        }

        self.execute_effect(&payment).await
    }

    /// Manual retry. Only FAILED rows re-run the effect; at the retry cap
    /// the payment goes PERMANENTLY_FAILED and a dead letter is deposited,
    /// atomically, and the record is returned without error.
    pub async fn retry(
        &self,
        booking_id: Uuid,
        method_override: Option<&str>,
    ) -> AppResult<RetryOutcome> {
        let Some(payment) = self.find_by_booking(booking_id).await? else {
            return Ok(RetryOutcome::NotFound);
        };

        match payment.status {
            PaymentStatus::Success => {
                return Ok(RetryOutcome::Denied {
                    payment,
                    reason: "Cannot retry a successful payment".to_string(),
                });
            }
            PaymentStatus::Pending => {
                return Ok(RetryOutcome::Denied {
                    payment,
                    reason: "Payment is still processing".to_string(),
                });
            }
            PaymentStatus::PermanentlyFailed => {
                // Sink: repeat calls are no-ops returning the same record.
                return Ok(RetryOutcome::PermanentlyFailed(payment));
            }
            PaymentStatus::Failed => {}
        }

        if payment.retry_count >= self.max_retries {
            let parked = self.park_permanently_failed(&payment).await?;
            return Ok(RetryOutcome::PermanentlyFailed(parked));
        }

        let mut updated = sqlx::query(&format!(
            "UPDATE payments SET retry_count = retry_count + 1, last_retry_at = NOW(), \
             method = COALESCE($2, method), updated_at = NOW() \
             WHERE booking_id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .bind(method_override)
        .fetch_one(&self.pool)
        .await
        .map(|row| map_payment(&row))??;

        info!(
            booking_id = %booking_id,
            retry_count = updated.retry_count,
            max_retries = self.max_retries,
            "Re-executing payment effect"
        );

        updated = self.execute_effect(&updated).await?;
        Ok(RetryOutcome::Retried(updated))
    }

    /// Run the external effect, then commit the transition together with its
    /// outbox event.
    async fn execute_effect(&self, payment: &Payment) -> AppResult<Payment> {
        let outcome = self
            .gateway
            .charge(payment.booking_id, payment.amount, &payment.method)
            .await
            .map_err(|e| AppError::Internal(format!("Payment gateway error: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        match &outcome {
            ChargeOutcome::Approved { transaction_id } => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = 'SUCCESS', transaction_id = $2, error_message = NULL,
                        processed_at = NOW(), updated_at = NOW()
                    WHERE booking_id = $1
                    "#,
                )
                .bind(payment.booking_id)
                .bind(transaction_id)
                .execute(&mut *tx)
                .await?;

                enqueue(
                    &mut tx,
                    self.outbox.as_ref(),
                    &SagaEvent::PaymentSucceeded(PaymentSucceeded {
                        payment_id: payment.payment_id,
                        booking_id: payment.booking_id,
                        transaction_id: transaction_id.clone(),
                        amount: payment.amount,
                    }),
                    payment.correlation_id,
                )
                .await?;
            }
            ChargeOutcome::Declined { reason } => {
                sqlx::query(
                    r#"
                    UPDATE payments
                    SET status = 'FAILED', error_message = $2,
                        processed_at = NOW(), updated_at = NOW()
                    WHERE booking_id = $1
                    "#,
                )
                .bind(payment.booking_id)
                .bind(reason)
                .execute(&mut *tx)
                .await?;

                enqueue(
                    &mut tx,
                    self.outbox.as_ref(),
                    &SagaEvent::PaymentFailed(PaymentFailed {
                        payment_id: Some(payment.payment_id),
                        booking_id: payment.booking_id,
                        reason: reason.clone(),
                    }),
                    payment.correlation_id,
                )
                .await?;
            }
        }

        tx.commit().await?;

        match &outcome {
            ChargeOutcome::Approved { transaction_id } => {
                info!(
                    booking_id = %payment.booking_id,
                    transaction_id = %transaction_id,
                    "Payment succeeded"
                );
            }
            ChargeOutcome::Declined { reason } => {
                warn!(booking_id = %payment.booking_id, reason = %reason, "Payment failed");
            }
        }

        self.find_required(payment.booking_id).await
    }

    /// FAILED → PERMANENTLY_FAILED with a dead-letter deposit, one
    /// transaction. Exactly one dead letter per payment: the status guard
    /// above keeps repeat calls out of this path.
    async fn park_permanently_failed(&self, payment: &Payment) -> AppResult<Payment> {
        let error_message = format!(
            "Payment permanently failed after {} manual retries; deposited in dead-letter store",
            payment.retry_count
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE payments
            SET status = 'PERMANENTLY_FAILED', error_message = $2, updated_at = NOW()
            WHERE booking_id = $1
            "#,
        )
        .bind(payment.booking_id)
        .bind(&error_message)
        .execute(&mut *tx)
        .await?;

        self.dead_letters
            .insert_in_tx(
                &mut tx,
                &NewDeadLetter {
                    source_queue: "payment_retry".to_string(),
                    event_type: "PaymentRetryFailed".to_string(),
                    payload: payment.snapshot(),
                    error_message: payment
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Payment retries exhausted".to_string()),
                    attempt_count: payment.retry_count,
                    first_attempt_at: payment.created_at,
                },
            )
            .await?;

        tx.commit().await?;

        warn!(
            booking_id = %payment.booking_id,
            retry_count = payment.retry_count,
            "Payment permanently failed, dead letter deposited"
        );

        self.find_required(payment.booking_id).await
    }

    pub async fn find_by_booking(&self, booking_id: Uuid) -> AppResult<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE booking_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_payment).transpose()
    }

    async fn find_required(&self, booking_id: Uuid) -> AppResult<Payment> {
        self.find_by_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Payment for {} missing after write", booking_id)))
    }
}

fn map_payment(row: &PgRow) -> AppResult<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        payment_id: row.try_get("payment_id")?,
        booking_id: row.try_get("booking_id")?,
        amount: row.try_get("amount")?,
        method: row.try_get("method")?,
        status: status.parse().map_err(|e: String| AppError::Internal(e))?,
        transaction_id: row.try_get("transaction_id")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        last_retry_at: row.try_get("last_retry_at")?,
        correlation_id: row.try_get("correlation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}
