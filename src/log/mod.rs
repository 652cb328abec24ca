//! Append-only event log interface
//!
//! The replicated log itself (content-addressed storage, CRDT merge, gossip)
//! lives outside this crate. [`EventLog`] is the surface the sync engine and
//! the service API consume; [`InMemoryEventLog`] is a single-node
//! implementation that honours the same contract:
//! - entries are content-addressed and immutable
//! - iteration is in append order and resumable from a cursor
//! - every admitted append is announced on a bounded live channel
//! - appends are admitted only through the access controller

mod memory;

pub use memory::*;

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::auth::AccessController;
use crate::domain::{EventPayload, LogEntry, Metadata};

/// Errors raised by the log
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The access controller refused the append
    #[error("append unauthorized for writer {writer}")]
    AppendUnauthorized { writer: String },

    /// `start_after` names an entry the log does not hold
    #[error("unknown cursor: {0}")]
    UnknownCursor(String),

    /// A replicated entry whose hash does not match its content
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("internal log error: {0}")]
    Internal(String),
}

/// Query options for [`EventLog::iter`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IterOptions {
    /// Maximum number of entries returned (all when `None`)
    pub limit: Option<usize>,
    /// Only entries appended after this hash
    pub start_after: Option<String>,
    /// Inclusive lower bound on the payload timestamp
    pub from_timestamp: Option<i64>,
    /// Inclusive upper bound on the payload timestamp
    pub to_timestamp: Option<i64>,
    /// Metadata pairs every returned entry must carry
    #[serde(default)]
    pub metadata: Metadata,
}

impl IterOptions {
    /// Next page of `limit` entries after `cursor`
    pub fn page(cursor: Option<String>, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            start_after: cursor,
            ..Default::default()
        }
    }

    /// Whether an entry passes the timestamp and metadata filters
    pub fn matches(&self, entry: &LogEntry) -> bool {
        let ts = entry.payload.timestamp;
        self.from_timestamp.map_or(true, |from| ts >= from)
            && self.to_timestamp.map_or(true, |to| ts <= to)
            && entry.payload.matches_metadata(&self.metadata)
    }
}

/// The append-only log consumed by the sync engine.
///
/// Invariant: entries are never modified or removed once admitted.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a payload as the local writer, returning the entry hash.
    ///
    /// Fails with [`LogError::AppendUnauthorized`] when the access
    /// controller refuses the local writer.
    async fn add(&self, payload: EventPayload) -> Result<String, LogError>;

    /// Admit an entry authored elsewhere. Returns false for a duplicate.
    async fn append(&self, entry: LogEntry) -> Result<bool, LogError>;

    /// Look up an entry by hash
    async fn get(&self, hash: &str) -> Result<Option<LogEntry>, LogError>;

    /// Entries in append order, filtered by `options`
    async fn iter(&self, options: IterOptions) -> Result<Vec<LogEntry>, LogError>;

    /// Number of admitted entries
    async fn len(&self) -> Result<usize, LogError>;

    /// Live notifications of admitted entries.
    ///
    /// The channel is bounded; a slow receiver loses the oldest notifications
    /// and must catch up through [`EventLog::iter`].
    fn subscribe(&self) -> broadcast::Receiver<LogEntry>;

    /// Controller deciding admission for this log
    fn access(&self) -> Arc<AccessController>;
}
