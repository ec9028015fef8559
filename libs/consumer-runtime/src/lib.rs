//! Idempotent consumer runtime.
//!
//! Runs one worker loop per (event, service) queue. Each delivery is decoded,
//! handled inside a correlation-scoped span, and acknowledged; failures go
//! through a bounded in-memory retry (nack-with-requeue) and end up routed to
//! the queue's `_dlq` with metadata headers. A companion worker drains each
//! `_dlq` into the service's dead-letter store.
//!
//! Handlers MUST be idempotent: the broker delivers at least once, and the
//! runtime keeps no processed-event log. Idempotency is enforced inside each
//! handler via business-key uniqueness (one reservation per booking, one
//! payment per booking, terminal-state checks). Handlers encode *business*
//! failures as domain failure events and return `Ok`; an `Err` is a
//! *technical* failure and is the only thing the retry pipeline sees.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions},
    types::FieldTable,
};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use amqp_bus::AmqpBus;
use dead_letter::{NewDeadLetter, SqlxDeadLetterStore};
use saga_events::{topology::QueueBinding, EventEnvelope};

mod config;
mod metadata;
mod tracker;

pub use config::ConsumerConfig;
pub use metadata::DlqMetadata;
pub use tracker::AttemptTracker;

/// A saga event handler bound to one queue.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one envelope. Business failures are handled inside (emit the
    /// failure event, return `Ok`); `Err` means a technical failure that the
    /// runtime retries and eventually dead-letters.
    async fn handle(&self, envelope: &EventEnvelope) -> anyhow::Result<()>;
}

/// Worker loop for a single consumer queue.
pub struct QueueWorker {
    bus: Arc<AmqpBus>,
    binding: QueueBinding,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    tracker: AttemptTracker,
    shutdown: watch::Receiver<bool>,
}

impl QueueWorker {
    pub fn new(
        bus: Arc<AmqpBus>,
        binding: QueueBinding,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            binding,
            handler,
            config,
            tracker: AttemptTracker::new(),
            shutdown,
        }
    }

    /// Consume until shutdown. Link loss re-enters the consume loop through
    /// the bus (which reconnects and re-declares the topology).
    pub async fn run(mut self) -> anyhow::Result<()> {
        let queue = self.binding.queue();
        let tag = format!("{}-worker", queue);

        info!(queue = %queue, "Queue worker starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let channel = match self.bus.consumer_channel(self.config.prefetch).await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to open consumer channel");
                    if self.pause_or_shutdown().await {
                        break;
                    }
                    continue;
                }
            };

            let mut consumer = match channel
                .basic_consume(
                    &queue,
                    &tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to start consuming");
                    if self.pause_or_shutdown().await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            // Stop taking deliveries; the in-flight handler
                            // (if any) already completed before this point.
                            let _ = channel.close(200, "shutting down").await;
                            info!(queue = %queue, "Queue worker stopped");
                            return Ok(());
                        }
                    }
                    delivery = consumer.next() => {
                        match delivery {
                            Some(Ok(delivery)) => {
                                if let Err(e) = self.process_delivery(delivery).await {
                                    warn!(queue = %queue, error = %e, "Delivery processing error");
                                }
                            }
                            Some(Err(e)) => {
                                error!(queue = %queue, error = %e, "Consumer stream error, reconnecting");
                                break;
                            }
                            None => {
                                warn!(queue = %queue, "Consumer stream ended, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }

            if self.pause_or_shutdown().await {
                break;
            }
        }

        info!(queue = %self.binding.queue(), "Queue worker stopped");
        Ok(())
    }

    async fn process_delivery(&mut self, delivery: Delivery) -> anyhow::Result<()> {
        let queue = self.binding.queue();

        // Undecodable payloads are poison: no retries, straight to the DLQ.
        let envelope = match EventEnvelope::from_bytes(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(queue = %queue, error = %e, "Poison message, routing to DLQ");
                let metadata = DlqMetadata {
                    retry_count: 1,
                    first_attempt: Utc::now(),
                    error_message: e.to_string(),
                    original_queue: queue.clone(),
                    failed_at: Utc::now(),
                };
                return self.route_to_dlq(delivery, metadata).await;
            }
        };

        let span = info_span!(
            "delivery",
            queue = %queue,
            event = %envelope.event_name,
            event_id = %envelope.event_id,
            correlation_id = %envelope.correlation_id,
        );

        let outcome = self.handler.handle(&envelope).instrument(span).await;

        match outcome {
            Ok(()) => {
                self.tracker.clear(envelope.event_id);
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(anyhow::Error::from)
            }
            Err(e) => {
                let state = self.tracker.record_failure(envelope.event_id, Utc::now());

                if state.attempts >= self.config.max_requeue {
                    error!(
                        queue = %queue,
                        event_id = %envelope.event_id,
                        attempts = state.attempts,
                        error = %e,
                        "Handler retries exhausted, routing to DLQ"
                    );
                    self.tracker.clear(envelope.event_id);
                    let metadata = DlqMetadata {
                        retry_count: state.attempts,
                        first_attempt: state.first_attempt,
                        error_message: e.to_string(),
                        original_queue: queue.clone(),
                        failed_at: Utc::now(),
                    };
                    self.route_to_dlq(delivery, metadata).await
                } else {
                    warn!(
                        queue = %queue,
                        event_id = %envelope.event_id,
                        attempt = state.attempts,
                        max_requeue = self.config.max_requeue,
                        error = %e,
                        "Handler failed, requeueing"
                    );
                    // Pace the redelivery; requeue reorders the message
                    // behind anything already queued, which handlers
                    // tolerate by design.
                    tokio::time::sleep(self.config.backoff_for(state.attempts)).await;
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..Default::default()
                        })
                        .await
                        .map_err(anyhow::Error::from)
                }
            }
        }
    }

    /// Publish the verbatim payload to `<queue>_dlq` with metadata headers,
    /// then ack the original to remove it from the main queue. If the DLQ
    /// publish itself fails the delivery is requeued; nothing is dropped.
    async fn route_to_dlq(&self, delivery: Delivery, metadata: DlqMetadata) -> anyhow::Result<()> {
        let dlq = self.binding.dlq();

        match self
            .bus
            .publish_to_queue(&dlq, &delivery.data, metadata.to_headers())
            .await
        {
            Ok(()) => delivery
                .ack(BasicAckOptions::default())
                .await
                .map_err(anyhow::Error::from),
            Err(e) => {
                error!(dlq = %dlq, error = %e, "Failed to route to DLQ, requeueing");
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                    .map_err(anyhow::Error::from)
            }
        }
    }

    /// Sleep the reconnect pause; returns true when shutdown fired.
    async fn pause_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(amqp_bus::RECONNECT_PAUSE) => false,
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
        }
    }
}

/// Drains one `_dlq` queue into the service's dead-letter store.
pub struct DlqWorker {
    bus: Arc<AmqpBus>,
    store: SqlxDeadLetterStore,
    binding: QueueBinding,
    shutdown: watch::Receiver<bool>,
}

impl DlqWorker {
    pub fn new(
        bus: Arc<AmqpBus>,
        store: SqlxDeadLetterStore,
        binding: QueueBinding,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bus,
            store,
            binding,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let dlq = self.binding.dlq();
        let tag = format!("{}-worker", dlq);

        info!(queue = %dlq, "DLQ worker starting");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let channel = match self.bus.consumer_channel(1).await {
                Ok(channel) => channel,
                Err(e) => {
                    error!(queue = %dlq, error = %e, "Failed to open DLQ channel");
                    if self.pause_or_shutdown().await {
                        break;
                    }
                    continue;
                }
            };

            let mut consumer = match channel
                .basic_consume(
                    &dlq,
                    &tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => consumer,
                Err(e) => {
                    error!(queue = %dlq, error = %e, "Failed to start consuming DLQ");
                    if self.pause_or_shutdown().await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            let _ = channel.close(200, "shutting down").await;
                            info!(queue = %dlq, "DLQ worker stopped");
                            return Ok(());
                        }
                    }
                    delivery = consumer.next() => {
                        match delivery {
                            Some(Ok(delivery)) => {
                                if let Err(e) = self.persist(delivery).await {
                                    warn!(queue = %dlq, error = %e, "Failed to persist dead letter");
                                }
                            }
                            Some(Err(e)) => {
                                error!(queue = %dlq, error = %e, "DLQ stream error, reconnecting");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            if self.pause_or_shutdown().await {
                break;
            }
        }

        info!(queue = %self.binding.dlq(), "DLQ worker stopped");
        Ok(())
    }

    async fn persist(&self, delivery: Delivery) -> anyhow::Result<()> {
        let metadata = DlqMetadata::from_properties(&delivery.properties, &self.binding.queue());

        // Keep the payload verbatim even when it is not valid JSON.
        let payload = serde_json::from_slice::<serde_json::Value>(&delivery.data)
            .unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&delivery.data).into_owned())
            });

        let event_type = payload
            .get("eventName")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let entry = NewDeadLetter {
            source_queue: metadata.original_queue.clone(),
            event_type,
            payload,
            error_message: metadata.error_message.clone(),
            attempt_count: metadata.retry_count as i32,
            first_attempt_at: metadata.first_attempt,
        };

        match self.store.insert(&entry).await {
            Ok(id) => {
                debug!(dead_letter_id = %id, "Dead letter persisted");
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(anyhow::Error::from)
            }
            Err(e) => {
                // Leave the message on the DLQ; it will be retried.
                error!(error = %e, "Dead-letter insert failed, requeueing");
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await
                    .map_err(anyhow::Error::from)
            }
        }
    }

    async fn pause_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(amqp_bus::RECONNECT_PAUSE) => false,
            changed = self.shutdown.changed() => {
                changed.is_err() || *self.shutdown.borrow()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct CountingHandler;

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _envelope: &EventEnvelope) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_handler_trait_is_object_safe() {
        let _handler: Arc<dyn EventHandler> = Arc::new(CountingHandler);
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = ConsumerConfig {
            max_requeue: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
            prefetch: 1,
            jitter: false,
        };
        assert_eq!(config.backoff_for(1), Duration::from_secs(2));
        assert_eq!(config.backoff_for(2), Duration::from_secs(4));
        assert_eq!(config.backoff_for(3), Duration::from_secs(8));
    }
}
