//! Trait definitions for durable sinks

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{SyncMetricsSnapshot, SyncedEvent};

use super::SinkError;

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// A transactional relational mirror of the log.
///
/// Invariant: `upsert_event` is idempotent on `id`; re-delivering the same
/// entry overwrites the row with identical content.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> SinkResult<Box<dyn SinkTransaction>>;

    /// Autocommit upsert of a single event
    async fn upsert_event(&self, event: &SyncedEvent) -> SinkResult<()>;

    /// Read back a mirrored event
    async fn get_event(&self, id: &str) -> SinkResult<Option<SyncedEvent>>;

    /// Append one metrics window
    async fn save_metrics(&self, snapshot: &SyncMetricsSnapshot) -> SinkResult<()>;

    /// Persisted metrics windows within `[from, to]`, oldest first
    async fn list_metrics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> SinkResult<Vec<SyncMetricsSnapshot>>;

    /// Cheap liveness probe
    async fn health_check(&self) -> SinkResult<()>;
}

/// An open sink transaction.
///
/// A failed `upsert_event` leaves the transaction usable, so the caller may
/// retry the same event. Dropping the transaction without `commit` rolls it
/// back.
#[async_trait]
pub trait SinkTransaction: Send {
    async fn upsert_event(&mut self, event: &SyncedEvent) -> SinkResult<()>;

    async fn commit(self: Box<Self>) -> SinkResult<()>;

    async fn rollback(self: Box<Self>) -> SinkResult<()>;
}
