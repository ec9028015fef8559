//! Metadata headers carried on messages routed to a `_dlq` queue.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lapin::BasicProperties;

pub const RETRY_COUNT: &str = "x-retry-count";
pub const FIRST_ATTEMPT: &str = "x-first-attempt";
pub const ERROR_MESSAGE: &str = "x-error-message";
pub const ORIGINAL_QUEUE: &str = "x-original-queue";
pub const FAILED_AT: &str = "x-failed-at";

/// What the DLQ consumer needs to persist a `DeadLetterMessage`.
#[derive(Debug, Clone, PartialEq)]
pub struct DlqMetadata {
    pub retry_count: u32,
    pub first_attempt: DateTime<Utc>,
    pub error_message: String,
    pub original_queue: String,
    pub failed_at: DateTime<Utc>,
}

impl DlqMetadata {
    pub fn to_headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert(RETRY_COUNT.to_string(), self.retry_count.to_string());
        headers.insert(FIRST_ATTEMPT.to_string(), self.first_attempt.to_rfc3339());
        headers.insert(ERROR_MESSAGE.to_string(), self.error_message.clone());
        headers.insert(ORIGINAL_QUEUE.to_string(), self.original_queue.clone());
        headers.insert(FAILED_AT.to_string(), self.failed_at.to_rfc3339());
        headers
    }

    /// Parse back from AMQP properties. Missing or malformed headers fall
    /// back to safe defaults so a hand-crafted DLQ message still lands.
    pub fn from_properties(properties: &BasicProperties, fallback_queue: &str) -> Self {
        let now = Utc::now();
        Self {
            retry_count: amqp_bus::header_value(properties, RETRY_COUNT)
                .and_then(|s| s.parse().ok())
                .unwrap_or(1),
            first_attempt: amqp_bus::header_value(properties, FIRST_ATTEMPT)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now),
            error_message: amqp_bus::header_value(properties, ERROR_MESSAGE)
                .unwrap_or_else(|| "unknown".to_string()),
            original_queue: amqp_bus::header_value(properties, ORIGINAL_QUEUE)
                .unwrap_or_else(|| fallback_queue.to_string()),
            failed_at: amqp_bus::header_value(properties, FAILED_AT)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqp_bus::field_table;

    #[test]
    fn test_metadata_roundtrip_through_amqp_headers() {
        let metadata = DlqMetadata {
            retry_count: 3,
            first_attempt: Utc::now(),
            error_message: "database timeout".to_string(),
            original_queue: "booking_created.inventory".to_string(),
            failed_at: Utc::now(),
        };

        let properties = BasicProperties::default().with_headers(field_table(&metadata.to_headers()));
        let parsed = DlqMetadata::from_properties(&properties, "fallback");

        assert_eq!(parsed.retry_count, 3);
        assert_eq!(parsed.error_message, "database timeout");
        assert_eq!(parsed.original_queue, "booking_created.inventory");
        // RFC3339 keeps sub-second precision; timestamps survive intact.
        assert_eq!(parsed.first_attempt, metadata.first_attempt);
        assert_eq!(parsed.failed_at, metadata.failed_at);
    }

    #[test]
    fn test_missing_headers_fall_back() {
        let parsed = DlqMetadata::from_properties(&BasicProperties::default(), "some_queue_dlq");
        assert_eq!(parsed.retry_count, 1);
        assert_eq!(parsed.error_message, "unknown");
        assert_eq!(parsed.original_queue, "some_queue_dlq");
    }
}
