//! Resilience primitives shared by the Stayflow services.
//!
//! Provides the single retry pipeline used across the platform (exponential
//! backoff with jitter) and a timeout wrapper for external calls. Broker
//! connection recovery, outbox publishing and consumer redelivery pacing all
//! go through these helpers with per-call-site tuning.

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
