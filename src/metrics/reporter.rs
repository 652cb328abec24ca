//! Periodic metrics reporter
//!
//! Background task that closes a metrics window every interval and persists
//! it through the sink. A failed save is logged; the window is still
//! published to subscribers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::domain::SyncMetricsSnapshot;
use crate::infra::EventSink;

use super::SyncMetrics;

/// Default reporting window
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Control messages for the reporter
#[derive(Debug)]
pub enum ReporterMessage {
    /// Close the window now
    ReportNow(oneshot::Sender<SyncMetricsSnapshot>),
    /// Emit a final window and stop
    Shutdown(oneshot::Sender<SyncMetricsSnapshot>),
}

pub struct MetricsReporter {
    metrics: Arc<SyncMetrics>,
    sink: Arc<dyn EventSink>,
    interval: Duration,
    control_rx: mpsc::Receiver<ReporterMessage>,
}

impl MetricsReporter {
    pub fn new(
        metrics: Arc<SyncMetrics>,
        sink: Arc<dyn EventSink>,
        interval: Duration,
    ) -> (Self, mpsc::Sender<ReporterMessage>) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let reporter = Self {
            metrics,
            sink,
            interval,
            control_rx,
        };
        (reporter, control_tx)
    }

    pub async fn run(mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting metrics reporter"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.report().await;
                }
                msg = self.control_rx.recv() => match msg {
                    Some(ReporterMessage::ReportNow(reply)) => {
                        let snapshot = self.report().await;
                        let _ = reply.send(snapshot);
                    }
                    Some(ReporterMessage::Shutdown(reply)) => {
                        let snapshot = self.report().await;
                        let _ = reply.send(snapshot);
                        info!("Metrics reporter shutting down");
                        break;
                    }
                    None => {
                        debug!("Metrics reporter handle dropped");
                        break;
                    }
                },
            }
        }
    }

    async fn report(&self) -> SyncMetricsSnapshot {
        let snapshot = self.metrics.take_window().await;
        info!(
            total_events = snapshot.total_events,
            synced_events = snapshot.synced_events,
            failed_events = snapshot.failed_events,
            retry_count = snapshot.retry_count,
            avg_sync_time_ms = snapshot.avg_sync_time_ms,
            batch_size = snapshot.batch_size,
            "Sync metrics window"
        );
        if let Err(e) = self.sink.save_metrics(&snapshot).await {
            error!(error = %e, "Failed to persist metrics window");
        }
        snapshot
    }
}

/// Spawn the reporter as a background task
pub fn spawn_metrics_reporter(
    metrics: Arc<SyncMetrics>,
    sink: Arc<dyn EventSink>,
    interval: Duration,
) -> (tokio::task::JoinHandle<()>, mpsc::Sender<ReporterMessage>) {
    let (reporter, control) = MetricsReporter::new(metrics, sink, interval);
    let handle = tokio::spawn(reporter.run());
    (handle, control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{InMemoryEventSink, MockEventSink, SinkError};

    #[tokio::test(start_paused = true)]
    async fn test_reports_every_interval() {
        let metrics = Arc::new(SyncMetrics::new());
        let sink = InMemoryEventSink::new();
        let (handle, control) = spawn_metrics_reporter(
            metrics.clone(),
            Arc::new(sink.clone()),
            Duration::from_secs(60),
        );

        metrics.record_sync("a", Duration::ZERO, true).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        metrics.record_sync("b", Duration::ZERO, true).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        let (tx, rx) = oneshot::channel();
        control.send(ReporterMessage::Shutdown(tx)).await.unwrap();
        rx.await.unwrap();
        handle.await.unwrap();

        let saved = sink.saved_metrics().await;
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0].synced_events, 1);
        assert_eq!(saved[1].synced_events, 1);
        assert_eq!(saved[2].synced_events, 0);
    }

    #[tokio::test]
    async fn test_save_failure_still_publishes() {
        let mut sink = MockEventSink::new();
        sink.expect_save_metrics()
            .times(1)
            .returning(|_| Err(SinkError::Unavailable("down".into())));

        let metrics = Arc::new(SyncMetrics::new());
        metrics.record_sync("a", Duration::ZERO, true).await;
        let (handle, control) =
            spawn_metrics_reporter(metrics.clone(), Arc::new(sink), Duration::from_secs(3600));

        let (tx, rx) = oneshot::channel();
        control.send(ReporterMessage::ReportNow(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap().synced_events, 1);
        assert_eq!(metrics.latest().unwrap().synced_events, 1);

        drop(control);
        handle.await.unwrap();
    }
}
