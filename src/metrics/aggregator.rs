//! Windowed sync metrics
//!
//! Counters accumulate over one reporting window and are reset when the
//! window is taken, so consecutive snapshots never overlap. The last synced
//! hash and the most recent batch size are gauges and carry over.
//! Lifetime totals are kept alongside for the Prometheus export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{watch, Mutex};

use crate::domain::SyncMetricsSnapshot;

#[derive(Debug, Default)]
struct Window {
    total_events: u64,
    synced_events: u64,
    failed_events: u64,
    retry_count: u64,
    sync_time_sum_ms: f64,
    sync_time_samples: u64,
    batch_size: u64,
    last_synced_hash: Option<String>,
}

impl Window {
    fn snapshot(&self) -> SyncMetricsSnapshot {
        let avg_sync_time_ms = if self.sync_time_samples > 0 {
            self.sync_time_sum_ms / self.sync_time_samples as f64
        } else {
            0.0
        };
        SyncMetricsSnapshot {
            timestamp: Utc::now(),
            total_events: self.total_events,
            synced_events: self.synced_events,
            failed_events: self.failed_events,
            retry_count: self.retry_count,
            avg_sync_time_ms,
            batch_size: self.batch_size,
            last_synced_hash: self.last_synced_hash.clone(),
        }
    }

    fn reset_counters(&mut self) {
        self.total_events = 0;
        self.synced_events = 0;
        self.failed_events = 0;
        self.retry_count = 0;
        self.sync_time_sum_ms = 0.0;
        self.sync_time_samples = 0;
    }
}

/// Totals since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeTotals {
    pub total_events: u64,
    pub synced_events: u64,
    pub failed_events: u64,
    pub retry_count: u64,
    pub windows_emitted: u64,
}

/// Sync metrics aggregator
pub struct SyncMetrics {
    window: Mutex<Window>,
    total_events: AtomicU64,
    synced_events: AtomicU64,
    failed_events: AtomicU64,
    retry_count: AtomicU64,
    windows_emitted: AtomicU64,
    latest: watch::Sender<Option<SyncMetricsSnapshot>>,
    start_time: Instant,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            window: Mutex::new(Window::default()),
            total_events: AtomicU64::new(0),
            synced_events: AtomicU64::new(0),
            failed_events: AtomicU64::new(0),
            retry_count: AtomicU64::new(0),
            windows_emitted: AtomicU64::new(0),
            latest,
            start_time: Instant::now(),
        }
    }

    /// Record the outcome of one event sync attempt
    pub async fn record_sync(&self, hash: &str, elapsed: Duration, success: bool) {
        let mut window = self.window.lock().await;
        window.total_events += 1;
        window.sync_time_sum_ms += elapsed.as_secs_f64() * 1000.0;
        window.sync_time_samples += 1;
        self.total_events.fetch_add(1, Ordering::Relaxed);

        if success {
            window.synced_events += 1;
            window.last_synced_hash = Some(hash.to_string());
            self.synced_events.fetch_add(1, Ordering::Relaxed);
        } else {
            window.failed_events += 1;
            self.failed_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a retry of `hash`
    pub async fn record_retry(&self, hash: &str) {
        self.window.lock().await.retry_count += 1;
        self.retry_count.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(hash, "Recorded retry");
    }

    /// Record the size of a newly formed batch
    pub async fn record_batch_size(&self, size: usize) {
        self.window.lock().await.batch_size = size as u64;
    }

    /// The current window so far, without resetting it
    pub async fn current(&self) -> SyncMetricsSnapshot {
        self.window.lock().await.snapshot()
    }

    /// Close the current window: snapshot, reset, and publish
    pub async fn take_window(&self) -> SyncMetricsSnapshot {
        let snapshot = {
            let mut window = self.window.lock().await;
            let snapshot = window.snapshot();
            window.reset_counters();
            snapshot
        };
        self.windows_emitted.fetch_add(1, Ordering::Relaxed);
        self.latest.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// Most recently emitted window
    pub fn latest(&self) -> Option<SyncMetricsSnapshot> {
        self.latest.borrow().clone()
    }

    /// Receive every emitted window
    pub fn subscribe(&self) -> watch::Receiver<Option<SyncMetricsSnapshot>> {
        self.latest.subscribe()
    }

    pub fn lifetime(&self) -> LifetimeTotals {
        LifetimeTotals {
            total_events: self.total_events.load(Ordering::Relaxed),
            synced_events: self.synced_events.load(Ordering::Relaxed),
            failed_events: self.failed_events.load(Ordering::Relaxed),
            retry_count: self.retry_count.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export in Prometheus text format
    pub async fn to_prometheus(&self) -> String {
        let totals = self.lifetime();
        let window = self.current().await;
        let mut output = String::new();

        let counters = [
            ("eventlog_sync_events_total", "Events processed", totals.total_events),
            ("eventlog_sync_synced_total", "Events committed to the sink", totals.synced_events),
            ("eventlog_sync_failed_total", "Event sync failures", totals.failed_events),
            ("eventlog_sync_retries_total", "Per-event retries", totals.retry_count),
            ("eventlog_sync_windows_total", "Metrics windows emitted", totals.windows_emitted),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
        }

        let gauges = [
            ("eventlog_sync_batch_size", "Size of the most recent batch", window.batch_size as f64),
            ("eventlog_sync_window_avg_sync_ms", "Average sync time in the current window", window.avg_sync_time_ms),
            ("eventlog_sync_uptime_seconds", "Seconds since startup", self.uptime_seconds() as f64),
        ];
        for (name, help, value) in gauges {
            output.push_str(&format!("# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n"));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_average_and_reset() {
        let metrics = SyncMetrics::new();
        metrics.record_batch_size(3).await;
        metrics.record_sync("a", Duration::from_millis(10), true).await;
        metrics.record_sync("b", Duration::from_millis(30), true).await;
        metrics.record_sync("c", Duration::from_millis(20), false).await;
        metrics.record_retry("c").await;

        let snapshot = metrics.take_window().await;
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.synced_events, 2);
        assert_eq!(snapshot.failed_events, 1);
        assert_eq!(snapshot.retry_count, 1);
        assert!((snapshot.avg_sync_time_ms - 20.0).abs() < 1e-6);
        assert_eq!(snapshot.batch_size, 3);
        assert_eq!(snapshot.last_synced_hash.as_deref(), Some("b"));

        let next = metrics.take_window().await;
        assert_eq!(next.total_events, 0);
        assert_eq!(next.retry_count, 0);
        assert_eq!(next.avg_sync_time_ms, 0.0);
        // gauges carry over
        assert_eq!(next.batch_size, 3);
        assert_eq!(next.last_synced_hash.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_lifetime_survives_windows() {
        let metrics = SyncMetrics::new();
        metrics.record_sync("a", Duration::ZERO, true).await;
        metrics.take_window().await;
        metrics.record_sync("b", Duration::ZERO, true).await;

        let totals = metrics.lifetime();
        assert_eq!(totals.synced_events, 2);
        assert_eq!(totals.windows_emitted, 1);
    }

    #[tokio::test]
    async fn test_latest_published_on_take() {
        let metrics = SyncMetrics::new();
        let mut rx = metrics.subscribe();
        assert!(metrics.latest().is_none());

        metrics.record_sync("a", Duration::ZERO, true).await;
        metrics.take_window().await;

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().synced_events, 1);
        assert_eq!(metrics.latest().unwrap().synced_events, 1);
    }

    #[tokio::test]
    async fn test_prometheus_format() {
        let metrics = SyncMetrics::new();
        metrics.record_sync("a", Duration::ZERO, true).await;
        let text = metrics.to_prometheus().await;
        assert!(text.contains("# TYPE eventlog_sync_synced_total counter"));
        assert!(text.contains("eventlog_sync_synced_total 1\n"));
        assert!(text.contains("eventlog_sync_batch_size 0\n"));
    }
}
