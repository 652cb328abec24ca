//! Synchronization bookkeeping types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LogEntry;

/// Lifecycle of a sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Stopped => "stopped",
            SyncState::Running => "running",
            SyncState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// A group of entries committed in a single sink transaction.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    pub entries: Vec<LogEntry>,
    /// Number of transaction attempts already made for this batch
    pub attempt: u32,
    /// Failed batch whose entries this batch re-submits
    pub retry_of: Option<Uuid>,
}

impl Batch {
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            entries,
            attempt: 0,
            retry_of: None,
        }
    }

    /// A new batch re-submitting `entries` of the failed batch `original`
    pub fn retry_of(original: Uuid, entries: Vec<LogEntry>) -> Self {
        Self {
            retry_of: Some(original),
            ..Self::new(entries)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hashes(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.hash.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Formed, not yet committed
    Pending,
    /// Transaction committed
    Committed,
    /// Transaction rolled back; waiting at the head of the queue
    Requeued,
    /// Gave up; ids reported in `failed_ids`
    Failed,
    /// Every failed entry was handed to a retry batch, see `retried_as`
    Retried,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Committed | BatchState::Failed | BatchState::Retried
        )
    }
}

/// Externally visible status of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: Uuid,
    pub state: BatchState,
    pub event_count: usize,
    pub processed_count: usize,
    pub failed_ids: Vec<String>,
    /// Retry batches that took over entries of this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retried_as: Vec<Uuid>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchStatus {
    pub fn pending(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id,
            state: BatchState::Pending,
            event_count: batch.len(),
            processed_count: 0,
            failed_ids: Vec::new(),
            retried_as: Vec::new(),
            attempts: batch.attempt,
            last_error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Aggregated sync metrics over one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_events: u64,
    pub synced_events: u64,
    pub failed_events: u64,
    pub retry_count: u64,
    pub avg_sync_time_ms: f64,
    /// Size of the most recently formed batch
    pub batch_size: u64,
    pub last_synced_hash: Option<String>,
}

/// Point-in-time view of a sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Entries buffered but not yet formed into a batch
    pub pending_events: usize,
    /// Batches waiting for a retry cycle
    pub queued_batches: usize,
    pub last_synced_hash: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub failed_batches: Vec<Uuid>,
    pub backfill_complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serde_names() {
        assert_eq!(
            serde_json::to_string(&SyncState::Paused).unwrap(),
            "\"paused\""
        );
        assert_eq!(
            serde_json::to_string(&BatchState::Requeued).unwrap(),
            "\"requeued\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(BatchState::Committed.is_terminal());
        assert!(BatchState::Failed.is_terminal());
        assert!(BatchState::Retried.is_terminal());
        assert!(!BatchState::Pending.is_terminal());
        assert!(!BatchState::Requeued.is_terminal());
    }
}
