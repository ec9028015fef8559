/// Consumer worker configuration, loaded from environment variables.
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Handler attempts before a delivery is routed to the DLQ
    pub max_requeue: u32,
    /// Base delay before a redelivery
    pub retry_base_delay: Duration,
    /// Redelivery delay cap
    pub retry_max_delay: Duration,
    /// Broker prefetch per consumer
    pub prefetch: u16,
    /// Jitter redelivery pacing (disabled in tests)
    pub jitter: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_requeue: 3,
            retry_base_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
            prefetch: 1,
            jitter: true,
        }
    }
}

impl ConsumerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_requeue: std::env::var("CONSUMER_MAX_REQUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_requeue),
            retry_base_delay: std::env::var("CONSUMER_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: defaults.retry_max_delay,
            prefetch: std::env::var("CONSUMER_PREFETCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.prefetch),
            jitter: defaults.jitter,
        }
    }

    /// Redelivery delay for the nth failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let config = resilience::RetryConfig {
            max_retries: self.max_requeue,
            initial_backoff: self.retry_base_delay,
            max_backoff: self.retry_max_delay,
            backoff_multiplier: 2.0,
            jitter: self.jitter,
        };
        resilience::retry::backoff_for_attempt(&config, attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_platform_profile() {
        let config = ConsumerConfig::default();
        assert_eq!(config.max_requeue, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(2));
        assert_eq!(config.prefetch, 1);
    }
}
