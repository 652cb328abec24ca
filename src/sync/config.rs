//! Sync engine configuration
//!
//! # Configuration
//!
//! - `SYNC_BATCH_SIZE` - entries per batch (default: 100)
//! - `SYNC_FLUSH_INTERVAL_MS` - flush timer period (default: 1000)
//! - `SYNC_RETRY_LIMIT` - per-event retries after the first try (default: 3)
//! - `SYNC_RETRY_DELAY_MS` - initial retry backoff (default: 5000)
//! - `SYNC_MAX_BATCH_ATTEMPTS` - transaction attempts before a batch fails (default: 3)
//! - `SYNC_MAX_BUFFERED_EVENTS` - live entries buffered before backpressure (default: 4 batches)
//! - `SYNC_HISTORY_LIMIT` - batch statuses retained (default: 1024)
//! - `METRICS_INTERVAL_SECS` - metrics window (default: 60)

use std::time::Duration;

use crate::infra::{RetryConfig, SyncError};
use crate::metrics::DEFAULT_METRICS_INTERVAL;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BATCH_ATTEMPTS: u32 = 3;

/// Configuration for a [`super::SyncEngine`]
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Per-event retry policy inside a batch transaction
    pub retry: RetryConfig,
    /// Transaction attempts per batch before it is marked failed
    pub max_batch_attempts: u32,
    /// Buffered entries above which the live channel is no longer drained
    pub max_buffered_events: usize,
    pub history_limit: usize,
    /// Hashes remembered to drop backfill/live overlap
    pub dedupe_window: usize,
    pub metrics_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry: RetryConfig::sink_event(),
            max_batch_attempts: DEFAULT_MAX_BATCH_ATTEMPTS,
            max_buffered_events: DEFAULT_BATCH_SIZE * 4,
            history_limit: 1024,
            dedupe_window: 4096,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl SyncConfig {
    /// Load configuration from environment
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let batch_size = env_parse("SYNC_BATCH_SIZE").unwrap_or(defaults.batch_size);
        let flush_interval = env_parse("SYNC_FLUSH_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.flush_interval);

        let mut retry = defaults.retry;
        if let Some(limit) = env_parse("SYNC_RETRY_LIMIT") {
            retry = retry.with_max_retries(limit);
        }
        if let Some(delay) = env_parse("SYNC_RETRY_DELAY_MS") {
            retry = retry.with_initial_delay(Duration::from_millis(delay));
        }

        let max_batch_attempts =
            env_parse("SYNC_MAX_BATCH_ATTEMPTS").unwrap_or(defaults.max_batch_attempts);
        let max_buffered_events =
            env_parse("SYNC_MAX_BUFFERED_EVENTS").unwrap_or(batch_size.saturating_mul(4));
        let history_limit = env_parse("SYNC_HISTORY_LIMIT").unwrap_or(defaults.history_limit);
        let metrics_interval = env_parse("METRICS_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.metrics_interval);

        Self {
            batch_size,
            flush_interval,
            retry,
            max_batch_attempts,
            max_buffered_events,
            history_limit,
            dedupe_window: defaults.dedupe_window,
            metrics_interval,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.max_buffered_events = self.max_buffered_events.max(batch_size);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_batch_attempts(mut self, attempts: u32) -> Self {
        self.max_batch_attempts = attempts;
        self
    }

    pub fn with_max_buffered_events(mut self, max: usize) -> Self {
        self.max_buffered_events = max;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Configuration("batch_size must be > 0".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(SyncError::Configuration(
                "flush_interval must be > 0".into(),
            ));
        }
        if self.metrics_interval.is_zero() {
            return Err(SyncError::Configuration(
                "metrics_interval must be > 0".into(),
            ));
        }
        if self.max_batch_attempts == 0 {
            return Err(SyncError::Configuration(
                "max_batch_attempts must be > 0".into(),
            ));
        }
        if self.max_buffered_events < self.batch_size {
            return Err(SyncError::Configuration(
                "max_buffered_events must be >= batch_size".into(),
            ));
        }
        Ok(())
    }
}
