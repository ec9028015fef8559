//! Outbox publisher for the booking service (singleton background task).

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;

use amqp_bus::AmqpBus;
use dead_letter::SqlxDeadLetterStore;
use transactional_outbox::{
    OutboxMetrics, OutboxProcessor, ProcessorConfig, SqlxOutboxRepository,
};

use crate::config::OutboxConfig;

pub async fn run(
    pool: PgPool,
    repository: Arc<SqlxOutboxRepository>,
    bus: Arc<AmqpBus>,
    config: OutboxConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let processor_config = ProcessorConfig {
        batch_size: config.batch_size,
        poll_interval: config.poll_interval,
        max_retries: config.max_retries,
        ..Default::default()
    };

    let dead_letters = SqlxDeadLetterStore::new(pool.clone());

    OutboxProcessor::new(pool, repository, bus, dead_letters, processor_config, shutdown)
        .with_metrics(OutboxMetrics::new("booking-service"))
        .run()
        .await
}
