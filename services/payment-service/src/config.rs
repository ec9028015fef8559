/// Configuration for the payment service, loaded from environment variables.
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub outbox: OutboxConfig,
    pub payment: PaymentConfig,
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
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: i32,
    pub max_retries: i32,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Manual retries before a payment goes PERMANENTLY_FAILED
    pub max_retries: i32,
    /// Simulated gateway success ratio (0.0..=1.0)
    pub simulated_success_ratio: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8083),
        };

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
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
            // The payment outbox gives up earlier than the others.
            max_retries: std::env::var("OUTBOX_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        };

        let payment = PaymentConfig {
            max_retries: std::env::var("PAYMENT_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            simulated_success_ratio: std::env::var("PAYMENT_SUCCESS_RATIO")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.9),
        };

        Ok(Config {
            app,
            database,
            outbox,
            payment,
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

        assert_eq!(config.outbox.max_retries, 3);
        assert_eq!(config.payment.max_retries, 3);
        assert!((config.payment.simulated_success_ratio - 0.9).abs() < f64::EPSILON);
    }
}
