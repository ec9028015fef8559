/// Configuration for the inventory service, loaded from environment
/// variables with platform defaults.
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub outbox: OutboxConfig,
    /// Reservation time-to-live before the expiry sweep releases it
    pub reservation_ttl: chrono::Duration,
    /// Expiry sweep cadence
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Statement timeout applied to every session
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i32,
    pub max_retries: i32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8082),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_max_connections),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_min_connections),
            statement_timeout: Duration::from_secs(
                std::env::var("DB_STATEMENT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        };

        let outbox = OutboxConfig {
            poll_interval: Duration::from_secs(
                std::env::var("OUTBOX_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            batch_size: std::env::var("OUTBOX_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            max_retries: std::env::var("OUTBOX_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let reservation_ttl = chrono::Duration::minutes(
            std::env::var("RESERVATION_TTL_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(15),
        );

        let sweep_interval = Duration::from_secs(
            std::env::var("RESERVATION_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        );

        Ok(Config {
            app,
            database,
            outbox,
            reservation_ttl,
            sweep_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        std::env::set_var("DATABASE_URL", "postgres://test");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.host, "0.0.0.0");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.outbox.poll_interval, Duration::from_secs(10));
        assert_eq!(config.outbox.batch_size, 100);
        assert_eq!(config.outbox.max_retries, 5);
        assert_eq!(config.reservation_ttl, chrono::Duration::minutes(15));
    }
}
