//! Transactional outbox.
//!
//! Guarantees that every event implied by a committed local state change is
//! eventually delivered to the broker at least once, or parked in the
//! dead-letter store. Business change and outbox insert happen in one local
//! transaction — that is the only way events enter the system. A singleton
//! background processor per service drains unpublished rows in batches,
//! publishes through the broker adapter, and spills rows that exhaust their
//! retry budget.
//!
//! ```text
//! handler tx:  UPDATE business row ──┐
//!              INSERT outbox row   ──┴─ COMMIT
//!                       │
//!            OutboxProcessor (poll) ──▶ AmqpBus::publish ──▶ broker
//!                       │ on exhaustion
//!                       └─▶ dead_letter_messages + published = true
//! ```
//!
//! Crashes between broker acceptance and the `published = true` write can
//! duplicate deliveries; consumers are idempotent by design.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use amqp_bus::AmqpBus;
use dead_letter::{NewDeadLetter, SqlxDeadLetterStore};
use saga_events::{topology, EventEnvelope, SagaEvent};

mod error;
pub mod metrics;

pub use error::{OutboxError, OutboxResult};
pub use metrics::OutboxMetrics;

/// A row in the per-service outbox table.
///
/// `published` removes the row from the work set; it is set either after
/// broker acceptance or after a dead-letter spill (the message is parked,
/// not lost).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    /// Saga event name (e.g. "BookingCreated")
    pub event_type: String,
    /// The full serialized event envelope
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Repository for outbox rows.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Insert a message within the caller's transaction. MUST be called in
    /// the same transaction as the business change that implies the event.
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> OutboxResult<()>;

    /// Unpublished messages, oldest first.
    async fn fetch_unpublished(&self, limit: i32) -> OutboxResult<Vec<OutboxMessage>>;

    /// Mark a message delivered (or parked).
    async fn mark_published(&self, id: Uuid) -> OutboxResult<()>;

    /// Same, inside a caller transaction (used by the dead-letter spill).
    async fn mark_published_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> OutboxResult<()>;

    /// Record a failed publish attempt.
    async fn record_failure(&self, id: Uuid, error: &str) -> OutboxResult<()>;

    /// Pending count and oldest pending age in seconds (0 when none).
    async fn pending_stats(&self) -> OutboxResult<(i64, i64)>;
}

/// SQLx/Postgres implementation of [`OutboxRepository`].
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &OutboxMessage,
    ) -> OutboxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                id, event_type, payload, created_at,
                published, published_at, retry_count, last_error, last_attempt_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id)
        .bind(&message.event_type)
        .bind(&message.payload)
        .bind(message.created_at)
        .bind(message.published)
        .bind(message.published_at)
        .bind(message.retry_count)
        .bind(&message.last_error)
        .bind(message.last_attempt_at)
        .execute(&mut **tx)
        .await
        .context("Failed to insert outbox message")?;

        debug!(
            message_id = %message.id,
            event_type = %message.event_type,
            "Message inserted into outbox"
        );

        Ok(())
    }

    async fn fetch_unpublished(&self, limit: i32) -> OutboxResult<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, payload, created_at,
                   published, published_at, retry_count, last_error, last_attempt_at
            FROM outbox_messages
            WHERE published = FALSE
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unpublished messages")?;

        let messages: Vec<OutboxMessage> = rows
            .into_iter()
            .map(|row| {
                Ok(OutboxMessage {
                    id: row.try_get("id")?,
                    event_type: row.try_get("event_type")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                    published: row.try_get("published")?,
                    published_at: row.try_get("published_at")?,
                    retry_count: row.try_get("retry_count")?,
                    last_error: row.try_get("last_error")?,
                    last_attempt_at: row.try_get("last_attempt_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .context("Failed to parse outbox rows")?;

        debug!(count = messages.len(), "Fetched unpublished messages");

        Ok(messages)
    }

    async fn mark_published(&self, id: Uuid) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET published = TRUE, published_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark message as published")?;

        if result.rows_affected() == 0 {
            warn!(message_id = %id, "Message not found when marking as published");
            return Err(OutboxError::MessageNotFound(id));
        }

        Ok(())
    }

    async fn mark_published_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET published = TRUE, published_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("Failed to mark message as published")?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::MessageNotFound(id));
        }

        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1,
                last_error = $2,
                last_attempt_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to record publish failure")?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::MessageNotFound(id));
        }

        warn!(message_id = %id, error = %error, "Publish attempt failed");

        Ok(())
    }

    async fn pending_stats(&self) -> OutboxResult<(i64, i64)> {
        let rec = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS pending,
                COALESCE(EXTRACT(EPOCH FROM (NOW() - MIN(created_at)))::BIGINT, 0) AS age_seconds
            FROM outbox_messages
            WHERE published = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute pending stats")?;

        let pending: i64 = rec.try_get("pending").unwrap_or(0);
        let age: i64 = rec.try_get("age_seconds").unwrap_or(0);
        Ok((pending, age))
    }
}

/// Wrap a saga event in an envelope and insert it into the outbox within the
/// caller's transaction. Returns the outbox row id.
pub async fn enqueue<R: OutboxRepository + ?Sized>(
    tx: &mut Transaction<'_, Postgres>,
    repo: &R,
    event: &SagaEvent,
    correlation_id: Uuid,
) -> OutboxResult<Uuid> {
    let envelope = EventEnvelope::wrap(event, correlation_id)?;
    let message = OutboxMessage {
        id: Uuid::new_v4(),
        event_type: envelope.event_name.clone(),
        payload: serde_json::to_value(&envelope)?,
        created_at: Utc::now(),
        published: false,
        published_at: None,
        retry_count: 0,
        last_error: None,
        last_attempt_at: None,
    };
    repo.insert(tx, &message).await?;
    Ok(message.id)
}

/// Processor configuration; defaults follow the platform profile.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: i32,
    pub poll_interval: Duration,
    /// Publish attempts before a row spills to the dead-letter store
    pub max_retries: i32,
    /// Backoff shape for per-row retry eligibility
    pub backoff: resilience::RetryConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_secs(10),
            max_retries: 5,
            backoff: resilience::RetryConfig {
                max_retries: 5,
                initial_backoff: Duration::from_secs(5),
                max_backoff: Duration::from_secs(60),
                backoff_multiplier: 2.0,
                jitter: false,
            },
        }
    }
}

/// Singleton background publisher for one service's outbox.
pub struct OutboxProcessor<R: OutboxRepository> {
    pool: PgPool,
    repository: Arc<R>,
    bus: Arc<AmqpBus>,
    dead_letters: SqlxDeadLetterStore,
    config: ProcessorConfig,
    metrics: Option<OutboxMetrics>,
    shutdown: watch::Receiver<bool>,
}

impl<R: OutboxRepository> OutboxProcessor<R> {
    pub fn new(
        pool: PgPool,
        repository: Arc<R>,
        bus: Arc<AmqpBus>,
        dead_letters: SqlxDeadLetterStore,
        config: ProcessorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            repository,
            bus,
            dead_letters,
            config,
            metrics: None,
            shutdown,
        }
    }

    /// Attach Prometheus metrics updated every polling cycle.
    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run until shutdown. Poll errors are logged and the loop continues;
    /// the outbox must survive broker outages.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_retries = self.config.max_retries,
            "Outbox processor starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.process_batch().await {
                Ok(count) if count > 0 => {
                    info!(published_count = count, "Published messages from outbox");
                }
                Ok(_) => debug!("No messages to publish"),
                Err(e) => error!(error = ?e, "Outbox processor error"),
            }

            if let Some(metrics) = &self.metrics {
                if let Ok((pending, age)) = self.repository.pending_stats().await {
                    metrics.pending.set(pending);
                    metrics.oldest_pending_age_seconds.set(age);
                }
            }
        }

        info!("Outbox processor stopped");
        Ok(())
    }

    /// Process one batch; returns the number of successfully published rows.
    async fn process_batch(&self) -> OutboxResult<i32> {
        let messages = self
            .repository
            .fetch_unpublished(self.config.batch_size)
            .await?;
        let mut published_count = 0;

        for message in messages {
            if !is_due(&message, Utc::now(), &self.config.backoff) {
                continue;
            }

            let Some(exchange) = topology::exchange_for(&message.event_type) else {
                // Unknown event type is poison, not a transient fault.
                warn!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    "Unknown event type in outbox, parking"
                );
                self.park(&message, "Unknown event type").await?;
                continue;
            };

            let payload = serde_json::to_vec(&message.payload)?;

            match self.bus.publish(exchange, &payload, headers_for(&message)).await {
                Ok(()) => {
                    self.repository.mark_published(message.id).await?;
                    published_count += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.published.inc();
                    }
                }
                Err(e) => {
                    let attempts = message.retry_count + 1;
                    if attempts >= self.config.max_retries {
                        error!(
                            message_id = %message.id,
                            event_type = %message.event_type,
                            attempts,
                            error = %e,
                            "Publish retries exhausted, spilling to dead-letter store"
                        );
                        self.park(&message, &e.to_string()).await?;
                    } else {
                        self.repository
                            .record_failure(message.id, &e.to_string())
                            .await?;
                    }
                }
            }
        }

        Ok(published_count)
    }

    /// Spill a message to the dead-letter store and remove it from the work
    /// set, atomically. The message is parked, not lost.
    async fn park(&self, message: &OutboxMessage, error: &str) -> OutboxResult<()> {
        let entry = NewDeadLetter {
            source_queue: format!("outbox_{}", message.event_type),
            event_type: message.event_type.clone(),
            payload: message.payload.clone(),
            error_message: error.to_string(),
            attempt_count: message.retry_count + 1,
            first_attempt_at: message.created_at,
        };

        let mut tx = self.pool.begin().await.context("Failed to begin spill")?;
        self.dead_letters.insert_in_tx(&mut tx, &entry).await?;
        self.repository
            .mark_published_in_tx(&mut tx, message.id)
            .await?;
        tx.commit().await.context("Failed to commit spill")?;

        if let Some(metrics) = &self.metrics {
            metrics.dead_lettered.inc();
        }

        Ok(())
    }
}

/// A row is due when its backoff window since the last failed attempt has
/// elapsed. Fresh rows are always due.
fn is_due(
    message: &OutboxMessage,
    now: DateTime<Utc>,
    backoff: &resilience::RetryConfig,
) -> bool {
    let Some(last_attempt) = message.last_attempt_at else {
        return true;
    };
    if message.retry_count <= 0 {
        return true;
    }
    let delay = resilience::retry::backoff_for_attempt(backoff, (message.retry_count - 1) as u32);
    let delay = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    now >= last_attempt + delay
}

/// Diagnostic headers carried next to the envelope body.
fn headers_for(message: &OutboxMessage) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("event_type".to_string(), message.event_type.clone());
    if let Some(correlation_id) = message
        .payload
        .get("correlationId")
        .and_then(|v| v.as_str())
    {
        headers.insert("correlation_id".to_string(), correlation_id.to_string());
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(retry_count: i32, last_attempt_at: Option<DateTime<Utc>>) -> OutboxMessage {
        OutboxMessage {
            id: Uuid::new_v4(),
            event_type: "BookingCreated".to_string(),
            payload: serde_json::json!({"correlationId": "6f3f2f4e-7e43-4f52-a8a3-2f8f36b0a0cd"}),
            created_at: Utc::now(),
            published: false,
            published_at: None,
            retry_count,
            last_error: None,
            last_attempt_at,
        }
    }

    fn backoff() -> resilience::RetryConfig {
        resilience::RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_fresh_rows_are_due() {
        assert!(is_due(&test_message(0, None), Utc::now(), &backoff()));
    }

    #[test]
    fn test_recently_failed_row_waits_for_backoff() {
        let now = Utc::now();
        let message = test_message(1, Some(now));
        assert!(!is_due(&message, now, &backoff()));
        // Due again after the first backoff step (5s).
        assert!(is_due(&message, now + chrono::Duration::seconds(6), &backoff()));
    }

    #[test]
    fn test_backoff_grows_with_retry_count() {
        let now = Utc::now();
        let message = test_message(3, Some(now));
        // Third retry waits 5 * 2^2 = 20s.
        assert!(!is_due(&message, now + chrono::Duration::seconds(19), &backoff()));
        assert!(is_due(&message, now + chrono::Duration::seconds(21), &backoff()));
    }

    #[test]
    fn test_headers_carry_correlation_id() {
        let message = test_message(0, None);
        let headers = headers_for(&message);
        assert_eq!(headers.get("event_type").unwrap(), "BookingCreated");
        assert_eq!(
            headers.get("correlation_id").unwrap(),
            "6f3f2f4e-7e43-4f52-a8a3-2f8f36b0a0cd"
        );
    }
}
