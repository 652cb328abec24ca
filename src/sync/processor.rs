//! Transactional batch commits with per-event retry

use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::domain::{Batch, LogEntry};
use crate::infra::{EventSink, Result, RetryConfig, SinkTransaction};
use crate::metrics::SyncMetrics;

/// Commits batches into a sink, one transaction per batch
pub struct BatchProcessor {
    sink: Arc<dyn EventSink>,
    metrics: Arc<SyncMetrics>,
    retry: RetryConfig,
}

impl BatchProcessor {
    pub fn new(sink: Arc<dyn EventSink>, metrics: Arc<SyncMetrics>, retry: RetryConfig) -> Self {
        Self {
            sink,
            metrics,
            retry,
        }
    }

    /// Upsert every entry of `batch` in one transaction and commit.
    ///
    /// On any failure the transaction is rolled back, nothing of the batch is
    /// visible in the sink and every entry of the batch counts as failed.
    /// Successes are recorded only once the commit went through.
    #[instrument(skip(self, batch), fields(batch_id = %batch.batch_id, size = batch.len(), attempt = batch.attempt))]
    pub async fn process_batch(&self, batch: &Batch) -> Result<()> {
        let mut timings: Vec<Duration> = Vec::with_capacity(batch.len());

        if let Err(e) = self.write_batch(batch, &mut timings).await {
            for (i, entry) in batch.entries.iter().enumerate() {
                let elapsed = timings.get(i).copied().unwrap_or_default();
                self.metrics.record_sync(&entry.hash, elapsed, false).await;
            }
            return Err(e);
        }

        for (entry, elapsed) in batch.entries.iter().zip(timings) {
            self.metrics.record_sync(&entry.hash, elapsed, true).await;
        }
        debug!("Batch committed");
        Ok(())
    }

    async fn write_batch(&self, batch: &Batch, timings: &mut Vec<Duration>) -> Result<()> {
        let mut tx = self.sink.begin().await?;

        for entry in &batch.entries {
            let started = Instant::now();
            let result = self
                .process_event_with_retry(tx.as_mut(), entry, batch.batch_id)
                .await;
            timings.push(started.elapsed());
            if let Err(e) = result {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Upsert one entry, retrying transient failures.
    ///
    /// Makes at most `retry.max_retries + 1` attempts with exponential
    /// backoff between them. Permanent errors are returned immediately.
    pub async fn process_event_with_retry(
        &self,
        tx: &mut dyn SinkTransaction,
        entry: &LogEntry,
        batch_id: Uuid,
    ) -> Result<()> {
        let event = entry.to_synced_event();
        let mut retries = 0;

        loop {
            match tx.upsert_event(&event).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && retries < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(retries);
                    retries += 1;
                    self.metrics.record_retry(&entry.hash).await;
                    warn!(
                        batch_id = %batch_id,
                        hash = %entry.hash,
                        retry = retries,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Event upsert failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        batch_id = %batch_id,
                        hash = %entry.hash,
                        retries,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Event upsert failed, giving up"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}
