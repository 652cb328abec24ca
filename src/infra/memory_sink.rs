//! In-memory sink with fault injection
//!
//! Behaves like the PostgreSQL sink (transactional, idempotent upsert) and
//! records every call so tests can assert on batching and retry behaviour.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{SyncMetricsSnapshot, SyncedEvent};
use crate::infra::{EventSink, SinkError, SinkResult, SinkTransaction};

#[derive(Default)]
struct Faults {
    /// Remaining upsert attempts that fail with `Unavailable`
    upserts: u32,
    /// Every upsert fails with `Unavailable`
    all_upserts: bool,
    /// Remaining commits that fail with `Unavailable`
    commits: u32,
    /// Ids rejected with a permanent `InvalidData`
    rejected_ids: HashSet<String>,
    commit_delay: Option<Duration>,
}

#[derive(Default)]
struct SinkState {
    events: BTreeMap<String, SyncedEvent>,
    metrics: Vec<SyncMetricsSnapshot>,
    faults: Faults,
    upsert_attempts: Vec<String>,
    commit_sizes: Vec<usize>,
    rollbacks: usize,
}

impl SinkState {
    fn check_upsert(&mut self, id: &str) -> SinkResult<()> {
        self.upsert_attempts.push(id.to_string());
        if self.faults.rejected_ids.contains(id) {
            return Err(SinkError::InvalidData(format!("rejected {id}")));
        }
        if self.faults.all_upserts {
            return Err(SinkError::Unavailable("injected upsert failure".into()));
        }
        if self.faults.upserts > 0 {
            self.faults.upserts -= 1;
            return Err(SinkError::Unavailable("injected upsert failure".into()));
        }
        Ok(())
    }
}

/// In-memory transactional sink
#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` upsert attempts with a transient error
    pub async fn fail_next_upserts(&self, n: u32) {
        self.state.lock().await.faults.upserts = n;
    }

    /// Fail every upsert with a transient error until cleared
    pub async fn fail_all_upserts(&self, enabled: bool) {
        self.state.lock().await.faults.all_upserts = enabled;
    }

    /// Fail the next `n` commits with a transient error
    pub async fn fail_next_commits(&self, n: u32) {
        self.state.lock().await.faults.commits = n;
    }

    /// Reject an id permanently
    pub async fn reject_event(&self, id: impl Into<String>) {
        self.state.lock().await.faults.rejected_ids.insert(id.into());
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults = Faults::default();
    }

    /// Delay every commit, keeping transactions in flight
    pub async fn set_commit_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.faults.commit_delay = delay;
    }

    /// Committed events ordered by id
    pub async fn events(&self) -> Vec<SyncedEvent> {
        self.state.lock().await.events.values().cloned().collect()
    }

    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Ids of every upsert attempt, in call order
    pub async fn upsert_attempts(&self) -> Vec<String> {
        self.state.lock().await.upsert_attempts.clone()
    }

    /// Number of events in each committed transaction, in commit order
    pub async fn commit_sizes(&self) -> Vec<usize> {
        self.state.lock().await.commit_sizes.clone()
    }

    pub async fn rollback_count(&self) -> usize {
        self.state.lock().await.rollbacks
    }

    pub async fn saved_metrics(&self) -> Vec<SyncMetricsSnapshot> {
        self.state.lock().await.metrics.clone()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn begin(&self) -> SinkResult<Box<dyn SinkTransaction>> {
        Ok(Box::new(InMemorySinkTransaction {
            state: self.state.clone(),
            staged: Vec::new(),
        }))
    }

    async fn upsert_event(&self, event: &SyncedEvent) -> SinkResult<()> {
        let mut state = self.state.lock().await;
        state.check_upsert(&event.id)?;
        state.events.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> SinkResult<Option<SyncedEvent>> {
        Ok(self.state.lock().await.events.get(id).cloned())
    }

    async fn save_metrics(&self, snapshot: &SyncMetricsSnapshot) -> SinkResult<()> {
        self.state.lock().await.metrics.push(snapshot.clone());
        Ok(())
    }

    async fn list_metrics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> SinkResult<Vec<SyncMetricsSnapshot>> {
        let state = self.state.lock().await;
        Ok(state
            .metrics
            .iter()
            .filter(|m| from.map_or(true, |f| m.timestamp >= f))
            .filter(|m| to.map_or(true, |t| m.timestamp <= t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Staged writes applied on commit
pub struct InMemorySinkTransaction {
    state: Arc<Mutex<SinkState>>,
    staged: Vec<SyncedEvent>,
}

#[async_trait]
impl SinkTransaction for InMemorySinkTransaction {
    async fn upsert_event(&mut self, event: &SyncedEvent) -> SinkResult<()> {
        self.state.lock().await.check_upsert(&event.id)?;
        self.staged.retain(|e| e.id != event.id);
        self.staged.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> SinkResult<()> {
        let delay = self.state.lock().await.faults.commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.faults.commits > 0 {
            state.faults.commits -= 1;
            state.rollbacks += 1;
            return Err(SinkError::Unavailable("injected commit failure".into()));
        }
        let size = self.staged.len();
        for event in self.staged {
            state.events.insert(event.id.clone(), event);
        }
        state.commit_sizes.push(size);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SinkResult<()> {
        self.state.lock().await.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, n: i64) -> SyncedEvent {
        SyncedEvent {
            id: id.into(),
            data: json!({"n": n}),
            timestamp: n,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let sink = InMemoryEventSink::new();
        sink.upsert_event(&event("a", 1)).await.unwrap();
        sink.upsert_event(&event("a", 1)).await.unwrap();
        assert_eq!(sink.event_count().await, 1);
        assert_eq!(sink.get_event("a").await.unwrap(), Some(event("a", 1)));
    }

    #[tokio::test]
    async fn test_transaction_visibility() {
        let sink = InMemoryEventSink::new();
        let mut tx = sink.begin().await.unwrap();
        tx.upsert_event(&event("a", 1)).await.unwrap();
        tx.upsert_event(&event("b", 2)).await.unwrap();
        assert_eq!(sink.event_count().await, 0);

        tx.commit().await.unwrap();
        assert_eq!(sink.event_count().await, 2);
        assert_eq!(sink.commit_sizes().await, vec![2]);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let sink = InMemoryEventSink::new();
        let mut tx = sink.begin().await.unwrap();
        tx.upsert_event(&event("a", 1)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(sink.event_count().await, 0);
        assert_eq!(sink.rollback_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let sink = InMemoryEventSink::new();
        sink.fail_next_upserts(1).await;
        sink.reject_event("bad").await;

        let mut tx = sink.begin().await.unwrap();
        let transient = tx.upsert_event(&event("a", 1)).await.unwrap_err();
        assert!(transient.is_retryable());
        tx.upsert_event(&event("a", 1)).await.unwrap();

        let permanent = tx.upsert_event(&event("bad", 2)).await.unwrap_err();
        assert!(!permanent.is_retryable());
        assert_eq!(sink.upsert_attempts().await, vec!["a", "a", "bad"]);
    }

    #[tokio::test]
    async fn test_commit_failure_discards_staged() {
        let sink = InMemoryEventSink::new();
        sink.fail_next_commits(1).await;
        let mut tx = sink.begin().await.unwrap();
        tx.upsert_event(&event("a", 1)).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(sink.event_count().await, 0);
    }
}
