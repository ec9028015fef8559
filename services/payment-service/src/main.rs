use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

use amqp_bus::{AmqpBus, BusConfig};
use consumer_runtime::{ConsumerConfig, DlqWorker, QueueWorker};
use dead_letter::SqlxDeadLetterStore;
use saga_events::topology::{self, services};
use transactional_outbox::SqlxOutboxRepository;

use payment_service::config::Config;
use payment_service::consumers::InventoryReservedHandler;
use payment_service::db::PaymentStore;
use payment_service::gateway::SimulatedGateway;
use payment_service::handlers::payments::{self, AppState};
use payment_service::workers::outbox_worker;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting payment-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        host = %config.app.host,
        port = config.app.port,
        success_ratio = config.payment.simulated_success_ratio,
        "Configuration loaded"
    );

    let connect_options = PgConnectOptions::from_str(&config.database.url)
        .context("Failed to parse DATABASE_URL")?
        .options([(
            "statement_timeout",
            config.database.statement_timeout.as_millis().to_string(),
        )]);

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let bus = Arc::new(
        AmqpBus::connect(BusConfig::from_env())
            .await
            .context("Failed to connect to broker")?,
    );
    info!("Broker connection established");

    let outbox_repo = Arc::new(SqlxOutboxRepository::new(pg_pool.clone()));
    let dead_letters = SqlxDeadLetterStore::new(pg_pool.clone());
    let gateway = Arc::new(SimulatedGateway::new(config.payment.simulated_success_ratio));
    let store = PaymentStore::new(
        pg_pool.clone(),
        outbox_repo.clone(),
        dead_letters.clone(),
        gateway,
        config.payment.max_retries,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let mut join_set = JoinSet::new();

    // HTTP surface
    let http_addr = format!("{}:{}", config.app.host, config.app.port);
    let http_store = store.clone();
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(AppState {
                store: http_store.clone(),
            }))
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/health", web::get().to(payments::health))
            .route("/payments/pay", web::post().to(payments::pay))
            .route("/payments/retry", web::post().to(payments::retry))
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .run();

    join_set.spawn(async move {
        http_server
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
    });
    info!(addr = %http_addr, "HTTP server started");

    // Outbox publisher (singleton)
    join_set.spawn(outbox_worker::run(
        pg_pool.clone(),
        outbox_repo.clone(),
        bus.clone(),
        config.outbox.clone(),
        shutdown_rx.clone(),
    ));

    // Saga consumer + its DLQ drain
    let consumer_config = ConsumerConfig::from_env();
    for binding in topology::bindings_for(services::PAYMENT) {
        let handler: Arc<dyn consumer_runtime::EventHandler> =
            Arc::new(InventoryReservedHandler::new(store.clone()));

        join_set.spawn(
            QueueWorker::new(
                bus.clone(),
                binding,
                handler,
                consumer_config.clone(),
                shutdown_rx.clone(),
            )
            .run(),
        );

        join_set.spawn(
            DlqWorker::new(
                bus.clone(),
                dead_letters.clone(),
                binding,
                shutdown_rx.clone(),
            )
            .run(),
        );
    }

    info!("payment-service is running");

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => info!("Task completed"),
            Ok(Err(e)) => {
                tracing::error!("Task failed: {:#}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Task panicked: {:#}", e);
                return Err(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
    }

    info!("payment-service shutting down");
    Ok(())
}
