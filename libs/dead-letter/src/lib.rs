//! Dead-letter store.
//!
//! Single sink for every message the platform cannot process, regardless of
//! where it failed: outbox publish exhaustion, consumer retry exhaustion,
//! poison payloads, or business-rule termination (max-retry payments).
//! Entries are append-only until an operator resolves them; the store never
//! auto-replays.
//!
//! Each service owns its own `dead_letter_messages` table next to its
//! business tables, created by that service's migrations.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

mod error;

pub use error::{DeadLetterError, DeadLetterResult};

/// A parked message with resolution metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterMessage {
    pub id: Uuid,
    /// Queue label the message came from (`outbox_<eventType>`, a consumer
    /// queue name, or a business source such as `payment_retry`)
    pub source_queue: String,
    pub event_type: String,
    /// Verbatim payload as it was on the wire
    pub payload: serde_json::Value,
    pub error_message: String,
    pub attempt_count: i32,
    pub first_attempt_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_notes: Option<String>,
}

/// Everything needed to park a message; `failed_at` is stamped on insert.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub source_queue: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub attempt_count: i32,
    pub first_attempt_at: DateTime<Utc>,
}

/// Postgres-backed dead-letter store.
#[derive(Clone)]
pub struct SqlxDeadLetterStore {
    pool: PgPool,
}

impl SqlxDeadLetterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park a message. Append-only; returns the new row id.
    pub async fn insert(&self, entry: &NewDeadLetter) -> DeadLetterResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages (
                id, source_queue, event_type, payload, error_message,
                attempt_count, first_attempt_at, failed_at, resolved
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), FALSE)
            "#,
        )
        .bind(id)
        .bind(&entry.source_queue)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.error_message)
        .bind(entry.attempt_count)
        .bind(entry.first_attempt_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert dead letter")?;

        tracing::warn!(
            dead_letter_id = %id,
            source_queue = %entry.source_queue,
            event_type = %entry.event_type,
            attempt_count = entry.attempt_count,
            "Message parked in dead-letter store"
        );

        Ok(id)
    }

    /// Park a message inside the caller's transaction, so the park commits
    /// atomically with the state change that caused it.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewDeadLetter,
    ) -> DeadLetterResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages (
                id, source_queue, event_type, payload, error_message,
                attempt_count, first_attempt_at, failed_at, resolved
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), FALSE)
            "#,
        )
        .bind(id)
        .bind(&entry.source_queue)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(&entry.error_message)
        .bind(entry.attempt_count)
        .bind(entry.first_attempt_at)
        .execute(&mut **tx)
        .await
        .context("Failed to insert dead letter in transaction")?;

        Ok(id)
    }

    /// Unresolved entries for triage, oldest failure first.
    pub async fn list_unresolved(&self, limit: i64) -> DeadLetterResult<Vec<DeadLetterMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_queue, event_type, payload, error_message,
                   attempt_count, first_attempt_at, failed_at,
                   resolved, resolved_at, resolved_by, resolution_notes
            FROM dead_letter_messages
            WHERE resolved = FALSE
            ORDER BY failed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unresolved dead letters")?;

        rows.into_iter().map(|row| map_row(&row)).collect()
    }

    pub async fn get(&self, id: Uuid) -> DeadLetterResult<Option<DeadLetterMessage>> {
        let row = sqlx::query(
            r#"
            SELECT id, source_queue, event_type, payload, error_message,
                   attempt_count, first_attempt_at, failed_at,
                   resolved, resolved_at, resolved_by, resolution_notes
            FROM dead_letter_messages
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch dead letter")?;

        row.map(|r| map_row(&r)).transpose()
    }

    /// Manual resolution: a privileged update recording who closed the entry
    /// and why. Replay, if any, is an operator action outside this store.
    pub async fn resolve(
        &self,
        id: Uuid,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> DeadLetterResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_messages
            SET resolved = TRUE,
                resolved_at = NOW(),
                resolved_by = $2,
                resolution_notes = $3
            WHERE id = $1 AND resolved = FALSE
            "#,
        )
        .bind(id)
        .bind(resolved_by)
        .bind(notes)
        .execute(&self.pool)
        .await
        .context("Failed to resolve dead letter")?;

        if result.rows_affected() == 0 {
            return Err(DeadLetterError::NotFound(id));
        }

        tracing::info!(dead_letter_id = %id, resolved_by, "Dead letter resolved");
        Ok(())
    }

    pub async fn unresolved_count(&self) -> DeadLetterResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS unresolved FROM dead_letter_messages WHERE resolved = FALSE",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count unresolved dead letters")?;

        Ok(row.try_get("unresolved").unwrap_or(0))
    }
}

fn map_row(row: &sqlx::postgres::PgRow) -> DeadLetterResult<DeadLetterMessage> {
    Ok(DeadLetterMessage {
        id: row.try_get("id")?,
        source_queue: row.try_get("source_queue")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        error_message: row.try_get("error_message")?,
        attempt_count: row.try_get("attempt_count")?,
        first_attempt_at: row.try_get("first_attempt_at")?,
        failed_at: row.try_get("failed_at")?,
        resolved: row.try_get("resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
        resolution_notes: row.try_get("resolution_notes")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_dead_letter_carries_verbatim_payload() {
        let payload = serde_json::json!({
            "eventId": Uuid::new_v4(),
            "eventName": "PaymentFailed",
            "data": {"reason": "card declined"},
        });
        let entry = NewDeadLetter {
            source_queue: "inventory_reserved.payment_dlq".to_string(),
            event_type: "InventoryReserved".to_string(),
            payload: payload.clone(),
            error_message: "db timeout".to_string(),
            attempt_count: 3,
            first_attempt_at: Utc::now(),
        };
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.attempt_count, 3);
    }
}
