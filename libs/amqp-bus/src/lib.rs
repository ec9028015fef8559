//! AMQP broker adapter.
//!
//! Owns the connection lifecycle (bounded-retry establishment, reconnect on
//! link loss), declares the static saga topology durably, publishes
//! persistent messages under publisher confirms, and hands out per-worker
//! consumer channels with manual acknowledgement.
//!
//! Publishing is atomic from the caller's perspective: `publish` returns
//! only after the broker confirmed acceptance, or fails. Confirmation is
//! bounded by the configured publish timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use lapin::{
    options::{
        BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

mod config;
mod error;

pub use config::BusConfig;
pub use error::{is_connection_error, BusError, BusResult};

use saga_events::topology;

/// Persistent delivery mode (survives broker restart).
const DELIVERY_MODE_PERSISTENT: u8 = 2;

struct BusState {
    connection: Connection,
    publish_channel: Channel,
}

/// Shared broker handle. Cheap to clone behind an `Arc`; one per service.
pub struct AmqpBus {
    config: BusConfig,
    state: Mutex<Option<BusState>>,
}

impl AmqpBus {
    /// Establish the initial connection, declare the full topology and
    /// return the adapter. Connection establishment retries only
    /// connection-class faults, with exponential backoff and jitter.
    pub async fn connect(config: BusConfig) -> BusResult<Self> {
        let bus = Self {
            config,
            state: Mutex::new(None),
        };
        bus.ensure_publish_channel().await?;
        Ok(bus)
    }

    /// Publish an event envelope to its exchange. Persistent delivery,
    /// publisher confirm awaited under the configured timeout.
    pub async fn publish(
        &self,
        exchange: &str,
        payload: &[u8],
        headers: BTreeMap<String, String>,
    ) -> BusResult<()> {
        self.publish_inner(exchange, "", payload, headers).await
    }

    /// Publish directly to a named queue via the default exchange. Used for
    /// dead-letter routing.
    pub async fn publish_to_queue(
        &self,
        queue: &str,
        payload: &[u8],
        headers: BTreeMap<String, String>,
    ) -> BusResult<()> {
        self.publish_inner("", queue, payload, headers).await
    }

    /// A dedicated channel for one consumer worker, with the given prefetch
    /// and manual acknowledgement. Workers re-call this after link loss.
    pub async fn consumer_channel(&self, prefetch: u16) -> BusResult<Channel> {
        let mut guard = self.state.lock().await;
        let state = self.connected_state(&mut guard).await?;

        let channel = state
            .connection
            .create_channel()
            .await
            .map_err(|e| BusError::Channel(format!("Failed to create consumer channel: {}", e)))?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BusError::Channel(format!("Failed to set prefetch: {}", e)))?;

        Ok(channel)
    }

    async fn publish_inner(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        headers: BTreeMap<String, String>,
    ) -> BusResult<()> {
        let channel = self.ensure_publish_channel().await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_content_type("application/json".to_string().into())
            .with_headers(field_table(&headers));

        let confirm = resilience::with_timeout(self.config.publish_timeout, async {
            let confirm = channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    properties,
                )
                .await?;
            confirm.await
        })
        .await;

        match confirm {
            Ok(Ok(Confirmation::NotRequested)) | Ok(Ok(Confirmation::Ack(_))) => {
                debug!(exchange, routing_key, bytes = payload.len(), "Message confirmed by broker");
                Ok(())
            }
            Ok(Ok(Confirmation::Nack(_))) => Err(BusError::Nacked),
            Ok(Err(e)) => {
                if is_connection_error(&e) {
                    // Drop the stale state so the next call reconnects.
                    self.state.lock().await.take();
                    Err(BusError::Connection(e.to_string()))
                } else {
                    Err(BusError::Publish(e.to_string()))
                }
            }
            Err(_) => {
                self.state.lock().await.take();
                Err(BusError::PublishTimeout(self.config.publish_timeout))
            }
        }
    }

    async fn ensure_publish_channel(&self) -> BusResult<Channel> {
        let mut guard = self.state.lock().await;
        let state = self.connected_state(&mut guard).await?;
        Ok(state.publish_channel.clone())
    }

    /// Return a live state, re-establishing the connection (and re-declaring
    /// the topology) when the link is gone.
    async fn connected_state<'a>(
        &self,
        guard: &'a mut Option<BusState>,
    ) -> BusResult<&'a BusState> {
        let alive = guard
            .as_ref()
            .map(|s| s.connection.status().connected() && s.publish_channel.status().connected())
            .unwrap_or(false);

        if !alive {
            if guard.is_some() {
                warn!("Broker link lost, reconnecting");
                guard.take();
            }
            let state = self.establish().await?;
            *guard = Some(state);
        }

        Ok(guard.as_ref().expect("state populated above"))
    }

    async fn establish(&self) -> BusResult<BusState> {
        let url = self.config.url.clone();
        let retry = self.config.retry_config();

        let connection = resilience::with_retry_if(
            retry,
            || Connection::connect(&url, ConnectionProperties::default()),
            is_connection_error,
        )
        .await
        .map_err(|e| BusError::Connection(format!("Failed to connect to broker: {}", e.into_inner())))?;

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| BusError::Channel(format!("Failed to create channel: {}", e)))?;
        publish_channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BusError::Channel(format!("Failed to enable confirms: {}", e)))?;

        declare_topology(&publish_channel).await?;

        info!("Broker connection established, topology declared");

        Ok(BusState {
            connection,
            publish_channel,
        })
    }
}

/// Declare the full static topology: one durable fanout exchange per event
/// type, a durable queue per (event, consumer) binding, and a durable DLQ
/// per consumer queue.
pub async fn declare_topology(channel: &Channel) -> BusResult<()> {
    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };
    let durable_exchange = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    for exchange in topology::ALL_EXCHANGES {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                durable_exchange,
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BusError::Channel(format!("Failed to declare exchange {}: {}", exchange, e))
            })?;
    }

    for binding in topology::BINDINGS {
        let queue = binding.queue();
        channel
            .queue_declare(&queue, durable_queue, FieldTable::default())
            .await
            .map_err(|e| BusError::Channel(format!("Failed to declare queue {}: {}", queue, e)))?;
        channel
            .queue_bind(
                &queue,
                binding.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Channel(format!("Failed to bind queue {}: {}", queue, e)))?;

        let dlq = binding.dlq();
        channel
            .queue_declare(&dlq, durable_queue, FieldTable::default())
            .await
            .map_err(|e| BusError::Channel(format!("Failed to declare DLQ {}: {}", dlq, e)))?;
    }

    Ok(())
}

/// Convert string headers into an AMQP field table.
pub fn field_table(headers: &BTreeMap<String, String>) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in headers {
        table.insert(key.clone().into(), AMQPValue::LongString(value.clone().into()));
    }
    table
}

/// Read a string header back out of AMQP properties.
pub fn header_value(properties: &BasicProperties, key: &str) -> Option<String> {
    properties.headers().as_ref().and_then(|table| {
        table.inner().iter().find_map(|(k, v)| {
            if k.as_str() == key {
                match v {
                    AMQPValue::LongString(s) => Some(s.to_string()),
                    _ => None,
                }
            } else {
                None
            }
        })
    })
}

/// How long a consumer loop waits before re-entering `consumer_channel`
/// after an unexpected stream end.
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_table_roundtrip() {
        let mut headers = BTreeMap::new();
        headers.insert("x-retry-count".to_string(), "3".to_string());
        headers.insert("x-original-queue".to_string(), "booking_created.inventory".to_string());

        let table = field_table(&headers);
        let properties = BasicProperties::default().with_headers(table);

        assert_eq!(
            header_value(&properties, "x-retry-count"),
            Some("3".to_string())
        );
        assert_eq!(
            header_value(&properties, "x-original-queue"),
            Some("booking_created.inventory".to_string())
        );
        assert_eq!(header_value(&properties, "x-missing"), None);
    }
}
