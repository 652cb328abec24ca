//! Bounded bookkeeping for the batching loop

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Batch, BatchState, BatchStatus, LogEntry};

/// Recent batch statuses, oldest settled entries evicted first.
///
/// Failed batches keep their entries so an operator can retry them, and are
/// never evicted while any of those entries is outstanding. The limit bounds
/// only committed and retried batches.
pub struct BatchHistory {
    order: VecDeque<Uuid>,
    statuses: HashMap<Uuid, BatchStatus>,
    failed_entries: HashMap<Uuid, Vec<LogEntry>>,
    limit: usize,
}

impl BatchHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            order: VecDeque::new(),
            statuses: HashMap::new(),
            failed_entries: HashMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn get(&self, batch_id: &Uuid) -> Option<&BatchStatus> {
        self.statuses.get(batch_id)
    }

    pub fn failed_entries(&self, batch_id: &Uuid) -> Option<&[LogEntry]> {
        self.failed_entries.get(batch_id).map(Vec::as_slice)
    }

    /// Ids of batches currently in the failed state, oldest first
    pub fn failed_batches(&self) -> Vec<Uuid> {
        self.order
            .iter()
            .filter(|id| {
                self.statuses
                    .get(id)
                    .is_some_and(|s| s.state == BatchState::Failed)
            })
            .copied()
            .collect()
    }

    /// Record that `batch` is about to be attempted
    pub fn begin_attempt(&mut self, batch: &Batch) {
        match self.statuses.get_mut(&batch.batch_id) {
            Some(status) => {
                status.state = BatchState::Pending;
                status.attempts = batch.attempt;
            }
            None => {
                self.order.push_back(batch.batch_id);
                self.statuses
                    .insert(batch.batch_id, BatchStatus::pending(batch));
                self.evict();
            }
        }
    }

    pub fn mark_committed(&mut self, batch: &Batch) {
        if let Some(status) = self.statuses.get_mut(&batch.batch_id) {
            status.state = BatchState::Committed;
            status.processed_count = batch.len();
            status.failed_ids.clear();
            status.last_error = None;
            status.completed_at = Some(Utc::now());
        }
        self.hand_over(batch);
    }

    pub fn mark_requeued(&mut self, batch: &Batch, error: String) {
        if let Some(status) = self.statuses.get_mut(&batch.batch_id) {
            status.state = BatchState::Requeued;
            status.processed_count = 0;
            status.last_error = Some(error);
        }
    }

    pub fn mark_failed(&mut self, batch: &Batch, error: String) {
        if let Some(status) = self.statuses.get_mut(&batch.batch_id) {
            status.state = BatchState::Failed;
            status.processed_count = 0;
            status.failed_ids = batch.hashes();
            status.last_error = Some(error);
            status.completed_at = Some(Utc::now());
        }
        self.failed_entries
            .insert(batch.batch_id, batch.entries.clone());
        self.hand_over(batch);
    }

    /// Move the entries of a settled retry batch off the batch it re-submits.
    ///
    /// Committed entries are done; entries that failed again are now owned
    /// by `batch`. The original is `Retried` once nothing is left on it.
    fn hand_over(&mut self, batch: &Batch) {
        let Some(original) = batch.retry_of else {
            return;
        };
        let Some(status) = self.statuses.get_mut(&original) else {
            return;
        };
        let retried = batch.hashes();
        status.failed_ids.retain(|id| !retried.contains(id));
        if !status.retried_as.contains(&batch.batch_id) {
            status.retried_as.push(batch.batch_id);
        }
        if let Some(entries) = self.failed_entries.get_mut(&original) {
            entries.retain(|e| !retried.contains(&e.hash));
        }
        if status.failed_ids.is_empty() {
            status.state = BatchState::Retried;
            self.failed_entries.remove(&original);
        }
    }

    fn evict(&mut self) {
        while self.statuses.len() > self.limit {
            let position = self.order.iter().position(|id| {
                self.statuses.get(id).map_or(true, |s| {
                    s.state.is_terminal() && s.state != BatchState::Failed
                })
            });
            let Some(position) = position else { break };
            if let Some(id) = self.order.remove(position) {
                self.statuses.remove(&id);
                self.failed_entries.remove(&id);
            }
        }
    }
}

/// Fixed-size set of recently seen hashes
pub struct RecentHashes {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecentHashes {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns false if `hash` was already seen
    pub fn insert(&mut self, hash: &str) -> bool {
        if self.set.contains(hash) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.set.insert(hash.to_string());
        self.order.push_back(hash.to_string());
        true
    }
}
