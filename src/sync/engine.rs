//! Log-to-sink synchronization engine
//!
//! `STOPPED -> RUNNING <-> PAUSED -> STOPPED`
//!
//! [`SyncEngine::initialize`] subscribes to live notifications, backfills the
//! existing log page by page, then spawns the batching loop. The loop task
//! exclusively owns the buffer and the re-queue; live entries, the flush timer
//! and control commands are multiplexed in a single `select!`, so a batch is
//! only ever formed or committed by one task at a time.
//!
//! Batches flush when the buffer reaches `batch_size` or when the flush timer
//! fires with a non-empty buffer. A batch whose transaction fails is rolled
//! back and re-queued at the head of the next cycle; after
//! `max_batch_attempts` (or a permanent sink error) it is marked failed and
//! its ids are reported through [`SyncEngine::batch_status`].
//!
//! The live channel is bounded. When the loop falls behind (or stops draining
//! it because the buffer is full) the oldest notifications are dropped and the
//! loop catches up by reading the log after its cursor.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::domain::{
    Batch, BatchState, BatchStatus, LogEntry, SyncMetricsSnapshot, SyncState, SyncStatus,
};
use crate::infra::{EventSink, Result, SyncError};
use crate::log::{EventLog, IterOptions, LogError};
use crate::metrics::{spawn_metrics_reporter, ReporterMessage, SyncMetrics};

use super::history::{BatchHistory, RecentHashes};
use super::processor::BatchProcessor;
use super::SyncConfig;

/// Outcome of a flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub committed_batches: usize,
    pub committed_events: usize,
    pub requeued_batches: usize,
    pub failed_batches: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.committed_batches += other.committed_batches;
        self.committed_events += other.committed_events;
        self.requeued_batches += other.requeued_batches;
        self.failed_batches += other.failed_batches;
    }
}

enum Command {
    Trigger {
        force: bool,
        reply: oneshot::Sender<Result<FlushReport>>,
    },
    Pause {
        reply: oneshot::Sender<()>,
    },
    RetryBatch {
        batch: Batch,
        reply: oneshot::Sender<BatchStatus>,
    },
    Stop {
        reply: oneshot::Sender<FlushReport>,
    },
}

enum BatchOutcome {
    Committed(usize),
    Requeued(Batch),
    Failed,
}

struct Shared {
    history: BatchHistory,
    pending_events: usize,
    queued_batches: usize,
    last_synced_hash: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    backfill_complete: bool,
}

struct Tasks {
    control_tx: mpsc::Sender<Command>,
    loop_handle: JoinHandle<()>,
    reporter_tx: mpsc::Sender<ReporterMessage>,
    reporter_handle: JoinHandle<()>,
}

struct Inner {
    config: SyncConfig,
    log: Arc<dyn EventLog>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<SyncMetrics>,
    state_tx: watch::Sender<SyncState>,
    shared: Mutex<Shared>,
    tasks: Mutex<Option<Tasks>>,
}

/// Handle to a sync engine; clones share the same engine
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        log: Arc<dyn EventLog>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SyncState::Stopped);
        let shared = Shared {
            history: BatchHistory::new(config.history_limit),
            pending_events: 0,
            queued_batches: 0,
            last_synced_hash: None,
            last_sync_at: None,
            backfill_complete: false,
        };
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                log,
                sink,
                metrics: Arc::new(SyncMetrics::new()),
                state_tx,
                shared: Mutex::new(shared),
                tasks: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    pub fn metrics_aggregator(&self) -> &Arc<SyncMetrics> {
        &self.inner.metrics
    }

    /// Start syncing: backfill the existing log, then tail it.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let mut tasks = self.inner.tasks.lock().await;
        if tasks.is_some() {
            return Err(SyncError::InvalidState {
                operation: "initialize",
                state: self.state(),
            });
        }

        // Subscribe before reading so nothing appended during backfill is missed.
        let live_rx = self.inner.log.subscribe();
        self.inner.state_tx.send_replace(SyncState::Running);
        {
            let mut shared = self.inner.shared.lock().await;
            shared.backfill_complete = false;
        }

        let (reporter_handle, reporter_tx) = spawn_metrics_reporter(
            self.inner.metrics.clone(),
            self.inner.sink.clone(),
            self.inner.config.metrics_interval,
        );
        let (control_tx, control_rx) = mpsc::channel(32);
        let mut worker = SyncWorker::new(self.inner.clone(), control_rx);

        let backfilled = match worker.backfill().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Backfill failed");
                let (tx, rx) = oneshot::channel();
                if reporter_tx.send(ReporterMessage::Shutdown(tx)).await.is_ok() {
                    let _ = rx.await;
                }
                let _ = reporter_handle.await;
                self.inner.state_tx.send_replace(SyncState::Stopped);
                return Err(e);
            }
        };
        info!(
            committed_events = backfilled.committed_events,
            committed_batches = backfilled.committed_batches,
            requeued_batches = backfilled.requeued_batches,
            "Backfill complete, tailing log"
        );

        let loop_handle = tokio::spawn(worker.run(live_rx));
        *tasks = Some(Tasks {
            control_tx,
            loop_handle,
            reporter_tx,
            reporter_handle,
        });
        Ok(())
    }

    /// Flush now. `force` also re-reads the log after the cursor and is
    /// allowed while paused.
    pub async fn trigger(&self, force: bool) -> Result<FlushReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger { force, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Pause syncing. With `wait_for_batch` the call returns once the
    /// in-flight transaction has resolved and the buffer is drained;
    /// otherwise the state flips immediately and an in-flight transaction
    /// completes on its own.
    pub async fn pause(&self, wait_for_batch: bool) -> Result<SyncStatus> {
        match self.state() {
            SyncState::Stopped => {
                return Err(SyncError::InvalidState {
                    operation: "pause",
                    state: SyncState::Stopped,
                })
            }
            SyncState::Paused if !wait_for_batch => return Ok(self.status().await),
            _ => {}
        }

        if wait_for_batch {
            let (reply, rx) = oneshot::channel();
            self.send(Command::Pause { reply }).await?;
            rx.await.map_err(|_| SyncError::EngineStopped)?;
        } else {
            self.inner.state_tx.send_if_modified(|state| {
                let running = *state == SyncState::Running;
                if running {
                    *state = SyncState::Paused;
                }
                running
            });
        }
        info!(wait_for_batch, "Sync paused");
        Ok(self.status().await)
    }

    /// Resume after a pause
    pub async fn resume(&self) -> Result<SyncStatus> {
        let resumed = self.inner.state_tx.send_if_modified(|state| {
            let paused = *state == SyncState::Paused;
            if paused {
                *state = SyncState::Running;
            }
            paused
        });
        match self.state() {
            SyncState::Stopped => Err(SyncError::InvalidState {
                operation: "resume",
                state: SyncState::Stopped,
            }),
            _ => {
                if resumed {
                    info!("Sync resumed");
                }
                Ok(self.status().await)
            }
        }
    }

    /// Re-submit a failed batch, or the subset of it named by `event_ids`,
    /// as a new batch. Returns the status of the new batch.
    ///
    /// Once the new batch settles its entries leave the original's
    /// `failed_ids`; the original turns `Retried` when none remain.
    pub async fn retry_batch(&self, batch_id: Uuid, event_ids: &[String]) -> Result<BatchStatus> {
        let entries: Vec<LogEntry> = {
            let shared = self.inner.shared.lock().await;
            let status = shared
                .history
                .get(&batch_id)
                .ok_or(SyncError::BatchNotFound(batch_id))?;
            if status.state != BatchState::Failed {
                return Err(SyncError::InvalidArgument(format!(
                    "batch {batch_id} is {:?}, only failed batches can be retried",
                    status.state
                )));
            }
            let entries = shared.history.failed_entries(&batch_id).unwrap_or(&[]);
            entries
                .iter()
                .filter(|e| event_ids.is_empty() || event_ids.contains(&e.hash))
                .cloned()
                .collect()
        };
        if entries.is_empty() {
            return Err(SyncError::InvalidArgument(format!(
                "none of the given ids belong to batch {batch_id}"
            )));
        }

        let batch = Batch::retry_of(batch_id, entries);
        info!(
            original_batch_id = %batch_id,
            batch_id = %batch.batch_id,
            size = batch.len(),
            "Retrying failed batch"
        );
        let (reply, rx) = oneshot::channel();
        self.send(Command::RetryBatch { batch, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    pub async fn batch_status(&self, batch_id: Uuid) -> Result<BatchStatus> {
        self.inner
            .shared
            .lock()
            .await
            .history
            .get(&batch_id)
            .cloned()
            .ok_or(SyncError::BatchNotFound(batch_id))
    }

    pub async fn status(&self) -> SyncStatus {
        let shared = self.inner.shared.lock().await;
        SyncStatus {
            state: self.state(),
            pending_events: shared.pending_events,
            queued_batches: shared.queued_batches,
            last_synced_hash: shared.last_synced_hash.clone(),
            last_sync_at: shared.last_sync_at,
            failed_batches: shared.history.failed_batches(),
            backfill_complete: shared.backfill_complete,
        }
    }

    /// Metrics of the current, not yet emitted, window
    pub async fn metrics(&self) -> SyncMetricsSnapshot {
        self.inner.metrics.current().await
    }

    /// Persisted metrics windows
    pub async fn metrics_history(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<SyncMetricsSnapshot>> {
        Ok(self.inner.sink.list_metrics(from, to, limit).await?)
    }

    /// Every emitted metrics window
    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<SyncMetricsSnapshot>> {
        self.inner.metrics.subscribe()
    }

    /// Flush what is buffered, emit a final metrics window and stop.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<FlushReport> {
        let Some(tasks) = self.inner.tasks.lock().await.take() else {
            return Err(SyncError::InvalidState {
                operation: "stop",
                state: self.state(),
            });
        };

        let (reply, rx) = oneshot::channel();
        let report = if tasks.control_tx.send(Command::Stop { reply }).await.is_ok() {
            rx.await.unwrap_or_default()
        } else {
            FlushReport::default()
        };
        if let Err(e) = tasks.loop_handle.await {
            error!(error = %e, "Sync loop task failed");
        }

        let (tx, rx) = oneshot::channel();
        if tasks
            .reporter_tx
            .send(ReporterMessage::Shutdown(tx))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        if let Err(e) = tasks.reporter_handle.await {
            error!(error = %e, "Metrics reporter task failed");
        }

        self.inner.state_tx.send_replace(SyncState::Stopped);
        let status = self.status().await;
        info!(
            committed_events = report.committed_events,
            unsynced_events = status.pending_events,
            queued_batches = status.queued_batches,
            "Sync stopped"
        );
        Ok(report)
    }

    async fn send(&self, command: Command) -> Result<()> {
        let control_tx = self
            .inner
            .tasks
            .lock()
            .await
            .as_ref()
            .map(|t| t.control_tx.clone())
            .ok_or(SyncError::EngineStopped)?;
        control_tx
            .send(command)
            .await
            .map_err(|_| SyncError::EngineStopped)
    }
}

// ============================================================================
// Batching loop
// ============================================================================

struct SyncWorker {
    inner: Arc<Inner>,
    processor: BatchProcessor,
    control_rx: mpsc::Receiver<Command>,
    state_rx: watch::Receiver<SyncState>,
    buffer: VecDeque<LogEntry>,
    requeued: VecDeque<Batch>,
    recent: RecentHashes,
    /// Hash of the last entry taken from the log, in log order
    cursor: Option<String>,
    needs_catch_up: bool,
}

impl SyncWorker {
    fn new(inner: Arc<Inner>, control_rx: mpsc::Receiver<Command>) -> Self {
        let processor = BatchProcessor::new(
            inner.sink.clone(),
            inner.metrics.clone(),
            inner.config.retry.clone(),
        );
        Self {
            state_rx: inner.state_tx.subscribe(),
            recent: RecentHashes::new(inner.config.dedupe_window),
            processor,
            control_rx,
            buffer: VecDeque::new(),
            requeued: VecDeque::new(),
            cursor: None,
            needs_catch_up: false,
            inner,
        }
    }

    fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    /// Page through the existing log, committing each page in order
    async fn backfill(&mut self) -> Result<FlushReport> {
        let mut report = self.read_after_cursor(true).await?;
        report.absorb(self.flush(true, false).await);
        self.inner.shared.lock().await.backfill_complete = true;
        self.publish().await;
        Ok(report)
    }

    /// Enqueue every log entry after the cursor. Stops early when paused
    /// (unless `ignore_state`) or when the buffer is full, leaving
    /// `needs_catch_up` set.
    async fn read_after_cursor(&mut self, ignore_state: bool) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        self.needs_catch_up = true;

        loop {
            if !ignore_state && self.state() != SyncState::Running {
                return Ok(report);
            }
            if self.buffer.len() >= self.config().max_buffered_events {
                return Ok(report);
            }

            let options = IterOptions::page(self.cursor.clone(), self.config().batch_size);
            let page = match self.inner.log.iter(options).await {
                Ok(page) => page,
                Err(LogError::UnknownCursor(cursor)) => {
                    warn!(cursor = %cursor, "Cursor unknown to the log, rescanning from start");
                    self.cursor = None;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if page.is_empty() {
                self.needs_catch_up = false;
                return Ok(report);
            }
            trace!(size = page.len(), "Read page from log");
            for entry in page {
                report.absorb(self.enqueue(entry).await);
            }
        }
    }

    async fn enqueue(&mut self, entry: LogEntry) -> FlushReport {
        if !self.recent.insert(&entry.hash) {
            trace!(hash = %entry.hash, "Skipping already queued entry");
            return FlushReport::default();
        }
        self.cursor = Some(entry.hash.clone());
        self.buffer.push_back(entry);

        if self.buffer.len() >= self.config().batch_size {
            self.flush(false, false).await
        } else {
            FlushReport::default()
        }
    }

    /// Commit re-queued batches first, then form batches from the buffer.
    /// With `drain` every buffered entry is flushed; otherwise only full
    /// batches. A batch that fails again ends the cycle, and so does a pause
    /// unless `ignore_pause` is set. The in-flight batch always completes.
    async fn flush(&mut self, drain: bool, ignore_pause: bool) -> FlushReport {
        let mut report = FlushReport::default();

        while let Some(batch) = self.requeued.pop_front() {
            if !self.commit(batch, &mut report).await || self.halted(ignore_pause) {
                return report;
            }
        }

        let batch_size = self.config().batch_size;
        while !self.buffer.is_empty() && (drain || self.buffer.len() >= batch_size) {
            if self.halted(ignore_pause) {
                break;
            }
            let take = batch_size.min(self.buffer.len());
            let batch = Batch::new(self.buffer.drain(..take).collect());
            self.inner.metrics.record_batch_size(batch.len()).await;
            if !self.commit(batch, &mut report).await {
                break;
            }
        }
        report
    }

    fn halted(&self, ignore_pause: bool) -> bool {
        !ignore_pause && self.state() == SyncState::Paused
    }

    /// Returns false when the batch went back to the re-queue
    async fn commit(&mut self, batch: Batch, report: &mut FlushReport) -> bool {
        match self.commit_batch(batch).await {
            BatchOutcome::Committed(events) => {
                report.committed_batches += 1;
                report.committed_events += events;
                true
            }
            BatchOutcome::Failed => {
                report.failed_batches += 1;
                true
            }
            BatchOutcome::Requeued(batch) => {
                report.requeued_batches += 1;
                self.requeued.push_front(batch);
                false
            }
        }
    }

    async fn commit_batch(&mut self, mut batch: Batch) -> BatchOutcome {
        batch.attempt += 1;
        self.inner.shared.lock().await.history.begin_attempt(&batch);

        let result = self.processor.process_batch(&batch).await;

        let mut shared = self.inner.shared.lock().await;
        match result {
            Ok(()) => {
                shared.history.mark_committed(&batch);
                shared.last_synced_hash = batch.entries.last().map(|e| e.hash.clone());
                shared.last_sync_at = Some(Utc::now());
                info!(
                    batch_id = %batch.batch_id,
                    size = batch.len(),
                    attempt = batch.attempt,
                    "Batch synced"
                );
                BatchOutcome::Committed(batch.len())
            }
            Err(e) if e.is_retryable() && batch.attempt < self.inner.config.max_batch_attempts => {
                warn!(
                    batch_id = %batch.batch_id,
                    size = batch.len(),
                    attempt = batch.attempt,
                    error = %e,
                    "Batch rolled back, re-queued"
                );
                shared.history.mark_requeued(&batch, e.to_string());
                BatchOutcome::Requeued(batch)
            }
            Err(e) => {
                let exhausted = SyncError::BatchExhausted {
                    batch_id: batch.batch_id,
                    failed_ids: batch.hashes(),
                };
                error!(
                    batch_id = %batch.batch_id,
                    size = batch.len(),
                    attempt = batch.attempt,
                    error = %e,
                    "{exhausted}"
                );
                shared.history.mark_failed(&batch, e.to_string());
                BatchOutcome::Failed
            }
        }
    }

    async fn publish(&self) {
        let mut shared = self.inner.shared.lock().await;
        shared.pending_events = self.buffer.len();
        shared.queued_batches = self.requeued.len();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Trigger { force, reply } => {
                let result = if self.state() == SyncState::Paused && !force {
                    Err(SyncError::InvalidState {
                        operation: "trigger",
                        state: SyncState::Paused,
                    })
                } else {
                    let mut report = FlushReport::default();
                    if force {
                        match self.read_after_cursor(true).await {
                            Ok(read) => report.absorb(read),
                            Err(e) => warn!(error = %e, "Forced catch-up failed"),
                        }
                    }
                    report.absorb(self.flush(true, true).await);
                    debug!(force, ?report, "Manual sync trigger");
                    Ok(report)
                };
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let report = self.flush(true, true).await;
                self.inner.state_tx.send_if_modified(|state| {
                    let running = *state == SyncState::Running;
                    if running {
                        *state = SyncState::Paused;
                    }
                    running
                });
                debug!(?report, "Drained before pause");
                let _ = reply.send(());
            }
            Command::RetryBatch { batch, reply } => {
                let batch_id = batch.batch_id;
                let mut report = FlushReport::default();
                self.commit(batch, &mut report).await;
                let status = self.inner.shared.lock().await.history.get(&batch_id).cloned();
                if let Some(status) = status {
                    let _ = reply.send(status);
                }
            }
            Command::Stop { reply } => {
                // handled by the loop
                let _ = reply.send(FlushReport::default());
            }
        }
    }

    async fn run(mut self, mut live_rx: broadcast::Receiver<LogEntry>) {
        let period = self.config().flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut live_open = true;

        info!(
            batch_size = self.config().batch_size,
            flush_interval_ms = period.as_millis() as u64,
            "Sync loop started"
        );

        loop {
            let state = *self.state_rx.borrow_and_update();
            let running = state == SyncState::Running;
            let has_room = self.buffer.len() < self.config().max_buffered_events;

            if running && self.needs_catch_up && has_room {
                if let Err(e) = self.read_after_cursor(false).await {
                    error!(error = %e, "Catch-up from log failed");
                    tokio::time::sleep(period).await;
                }
                self.publish().await;
                continue;
            }

            tokio::select! {
                biased;

                command = self.control_rx.recv() => match command {
                    Some(Command::Stop { reply }) => {
                        let report = self.flush(true, true).await;
                        self.publish().await;
                        let _ = reply.send(report);
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                received = live_rx.recv(), if running && has_room && live_open => match received {
                    Ok(entry) => {
                        self.enqueue(entry).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Live channel lagged, catching up from log");
                        self.needs_catch_up = true;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Live channel closed");
                        live_open = false;
                    }
                },

                _ = ticker.tick(), if running => {
                    if !self.buffer.is_empty() || !self.requeued.is_empty() {
                        self.flush(true, false).await;
                    }
                }
            }

            self.publish().await;
        }

        info!("Sync loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessController, IdentityProvider, InMemoryKeystore, Keystore};
    use crate::domain::{AccessPolicy, EventPayload, PeerRole};
    use crate::infra::{InMemoryEventSink, RetryConfig};
    use crate::log::InMemoryEventLog;
    use serde_json::json;
    use std::time::Duration;

    async fn log_with(n: usize) -> Arc<InMemoryEventLog> {
        let keystore: Arc<dyn Keystore> = Arc::new(InMemoryKeystore::new());
        let writer = IdentityProvider::new(keystore.clone())
            .create_identity("01")
            .await
            .unwrap();
        let access = Arc::new(AccessController::new(
            AccessPolicy::new([writer.id.clone()]),
            keystore,
            PeerRole::Owner,
        ));
        let log = Arc::new(InMemoryEventLog::new("engine-test", writer, access));
        for i in 0..n {
            log.add(EventPayload::new(json!({"n": i}))).await.unwrap();
        }
        log
    }

    fn engine(log: Arc<InMemoryEventLog>, sink: &InMemoryEventSink) -> SyncEngine {
        let config = SyncConfig::default()
            .with_retry(RetryConfig::immediate(3))
            .with_metrics_interval(Duration::from_secs(3600));
        SyncEngine::new(config, log, Arc::new(sink.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let sink = InMemoryEventSink::new();
        let engine = engine(log_with(0).await, &sink);

        assert_eq!(engine.state(), SyncState::Stopped);
        assert!(matches!(
            engine.pause(false).await,
            Err(SyncError::InvalidState { .. })
        ));
        assert!(matches!(
            engine.trigger(false).await,
            Err(SyncError::EngineStopped)
        ));

        engine.initialize().await.unwrap();
        assert_eq!(engine.state(), SyncState::Running);
        assert!(engine.initialize().await.is_err());

        assert_eq!(engine.pause(false).await.unwrap().state, SyncState::Paused);
        assert!(matches!(
            engine.trigger(false).await,
            Err(SyncError::InvalidState { .. })
        ));
        assert_eq!(engine.resume().await.unwrap().state, SyncState::Running);

        engine.stop().await.unwrap();
        assert_eq!(engine.state(), SyncState::Stopped);
        assert!(engine.stop().await.is_err());
        assert!(engine.resume().await.is_err());
    }

    #[tokio::test]
    async fn test_backfill_commits_in_log_order() {
        let sink = InMemoryEventSink::new();
        let log = log_with(250).await;
        let engine = engine(log.clone(), &sink);

        engine.initialize().await.unwrap();
        assert_eq!(sink.commit_sizes().await, vec![100, 100, 50]);

        let status = engine.status().await;
        assert!(status.backfill_complete);
        assert_eq!(status.pending_events, 0);
        let last = log.iter(IterOptions::default()).await.unwrap().pop().unwrap();
        assert_eq!(status.last_synced_hash, Some(last.hash));

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_batch() {
        let sink = InMemoryEventSink::new();
        let engine = engine(log_with(0).await, &sink);
        let id = Uuid::new_v4();
        assert!(matches!(
            engine.batch_status(id).await,
            Err(SyncError::BatchNotFound(missing)) if missing == id
        ));
        assert!(matches!(
            engine.retry_batch(id, &[]).await,
            Err(SyncError::BatchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_emits_final_metrics_window() {
        let sink = InMemoryEventSink::new();
        let engine = engine(log_with(3).await, &sink);
        engine.initialize().await.unwrap();
        engine.stop().await.unwrap();

        let saved = sink.saved_metrics().await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].synced_events, 3);
        assert_eq!(saved[0].batch_size, 3);
    }
}
