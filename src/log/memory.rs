//! Single-node in-memory event log

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::auth::AccessController;
use crate::crypto::entry_hash;
use crate::domain::{EventPayload, Identity, LogEntry};

use super::{EventLog, IterOptions, LogError};

/// Default capacity of the live notification channel
pub const DEFAULT_NOTIFY_CAPACITY: usize = 1024;

#[derive(Default)]
struct LogState {
    entries: Vec<LogEntry>,
    index: HashMap<String, usize>,
    /// Highest clock seen, local or replicated
    clock: u64,
}

/// In-memory log with access-controlled appends
pub struct InMemoryEventLog {
    name: String,
    writer: Identity,
    access: Arc<AccessController>,
    state: RwLock<LogState>,
    notifier: broadcast::Sender<LogEntry>,
}

impl InMemoryEventLog {
    pub fn new(name: impl Into<String>, writer: Identity, access: Arc<AccessController>) -> Self {
        Self::with_capacity(name, writer, access, DEFAULT_NOTIFY_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        writer: Identity,
        access: Arc<AccessController>,
        notify_capacity: usize,
    ) -> Self {
        let (notifier, _) = broadcast::channel(notify_capacity.max(1));
        Self {
            name: name.into(),
            writer,
            access,
            state: RwLock::new(LogState::default()),
            notifier,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity used for local appends
    pub fn writer(&self) -> &Identity {
        &self.writer
    }

    fn hash_for(payload: &EventPayload, author: &str, clock: u64) -> Result<String, LogError> {
        let value =
            serde_json::to_value(payload).map_err(|e| LogError::InvalidEntry(e.to_string()))?;
        let hash =
            entry_hash(&value, author, clock).map_err(|e| LogError::InvalidEntry(e.to_string()))?;
        Ok(hex::encode(hash))
    }

    fn admit(&self, state: &mut LogState, entry: LogEntry) {
        state.clock = state.clock.max(entry.clock);
        state.index.insert(entry.hash.clone(), state.entries.len());
        state.entries.push(entry.clone());
        // No receivers is fine; the sync engine may not be running yet.
        let _ = self.notifier.send(entry);
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn add(&self, payload: EventPayload) -> Result<String, LogError> {
        let mut state = self.state.write().await;
        let clock = state.clock + 1;
        let hash = Self::hash_for(&payload, &self.writer.id, clock)?;
        let entry = LogEntry {
            hash: hash.clone(),
            payload,
            identity: self.writer.clone(),
            clock,
        };

        if !self.access.can_append(&entry).await {
            warn!(log = %self.name, writer = %self.writer.id, "Append refused by access controller");
            return Err(LogError::AppendUnauthorized {
                writer: self.writer.id.clone(),
            });
        }

        self.admit(&mut state, entry);
        debug!(log = %self.name, hash = %hash, clock, "Appended entry");
        Ok(hash)
    }

    async fn append(&self, entry: LogEntry) -> Result<bool, LogError> {
        let expected = Self::hash_for(&entry.payload, &entry.identity.id, entry.clock)?;
        if expected != entry.hash {
            return Err(LogError::InvalidEntry(format!(
                "hash {} does not match content",
                entry.hash
            )));
        }

        let mut state = self.state.write().await;
        if state.index.contains_key(&entry.hash) {
            return Ok(false);
        }

        if !self.access.can_append(&entry).await {
            warn!(log = %self.name, writer = %entry.identity.id, "Replicated entry refused");
            return Err(LogError::AppendUnauthorized {
                writer: entry.identity.id.clone(),
            });
        }

        debug!(log = %self.name, hash = %entry.hash, "Admitted replicated entry");
        self.admit(&mut state, entry);
        Ok(true)
    }

    async fn get(&self, hash: &str) -> Result<Option<LogEntry>, LogError> {
        let state = self.state.read().await;
        Ok(state.index.get(hash).map(|&i| state.entries[i].clone()))
    }

    async fn iter(&self, options: IterOptions) -> Result<Vec<LogEntry>, LogError> {
        let state = self.state.read().await;
        let start = match &options.start_after {
            Some(cursor) => state
                .index
                .get(cursor)
                .map(|&i| i + 1)
                .ok_or_else(|| LogError::UnknownCursor(cursor.clone()))?,
            None => 0,
        };
        let limit = options.limit.unwrap_or(usize::MAX);

        Ok(state.entries[start..]
            .iter()
            .filter(|e| options.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize, LogError> {
        Ok(self.state.read().await.entries.len())
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.notifier.subscribe()
    }

    fn access(&self) -> Arc<AccessController> {
        self.access.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{IdentityProvider, InMemoryKeystore, Keystore};
    use crate::domain::{AccessPolicy, PeerRole};
    use serde_json::json;

    async fn setup(authorized: bool) -> (InMemoryEventLog, Arc<dyn Keystore>) {
        let keystore: Arc<dyn Keystore> = Arc::new(InMemoryKeystore::new());
        let writer = IdentityProvider::new(keystore.clone())
            .create_identity("0a0b")
            .await
            .unwrap();
        let policy = if authorized {
            AccessPolicy::new([writer.id.clone()])
        } else {
            AccessPolicy::default()
        };
        let access = Arc::new(AccessController::new(
            policy,
            keystore.clone(),
            PeerRole::Owner,
        ));
        (InMemoryEventLog::new("test", writer, access), keystore)
    }

    #[tokio::test]
    async fn test_add_get_iter() {
        let (log, _) = setup(true).await;
        let mut rx = log.subscribe();

        let mut hashes = Vec::new();
        for i in 0..5 {
            hashes.push(log.add(EventPayload::new(json!({"n": i}))).await.unwrap());
        }

        assert_eq!(log.len().await.unwrap(), 5);
        let entry = log.get(&hashes[2]).await.unwrap().unwrap();
        assert_eq!(entry.payload.data, json!({"n": 2}));
        assert_eq!(entry.clock, 3);

        let all = log.iter(IterOptions::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|e| e.hash.clone()).collect::<Vec<_>>(),
            hashes
        );

        let page = log
            .iter(IterOptions::page(Some(hashes[1].clone()), 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].hash, hashes[2]);

        assert_eq!(rx.recv().await.unwrap().hash, hashes[0]);
    }

    #[tokio::test]
    async fn test_same_payload_gets_distinct_hashes() {
        let (log, _) = setup(true).await;
        let payload = EventPayload::new(json!("same")).with_timestamp(1);
        let a = log.add(payload.clone()).await.unwrap();
        let b = log.add(payload).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_unauthorized_add_is_not_admitted() {
        let (log, _) = setup(false).await;
        let mut rx = log.subscribe();

        let err = log.add(EventPayload::new(json!(1))).await.unwrap_err();
        assert!(matches!(err, LogError::AppendUnauthorized { .. }));
        assert_eq!(log.len().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_iter_filters() {
        let (log, _) = setup(true).await;
        log.add(EventPayload::new(json!(1)).with_timestamp(100))
            .await
            .unwrap();
        log.add(
            EventPayload::new(json!(2))
                .with_timestamp(200)
                .with_metadata("kind", "order"),
        )
        .await
        .unwrap();
        log.add(EventPayload::new(json!(3)).with_timestamp(300))
            .await
            .unwrap();

        let ranged = log
            .iter(IterOptions {
                from_timestamp: Some(150),
                to_timestamp: Some(300),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let mut by_meta = IterOptions::default();
        by_meta.metadata.insert("kind".into(), "order".into());
        let filtered = log.iter(by_meta).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].payload.data, json!(2));
    }

    #[tokio::test]
    async fn test_unknown_cursor() {
        let (log, _) = setup(true).await;
        let err = log
            .iter(IterOptions::page(Some("nope".into()), 10))
            .await
            .unwrap_err();
        assert!(matches!(err, LogError::UnknownCursor(_)));
    }

    #[tokio::test]
    async fn test_replicated_append_checks_hash_and_dedupes() {
        let (source, _) = setup(true).await;
        let hash = source.add(EventPayload::new(json!("x"))).await.unwrap();
        let entry = source.get(&hash).await.unwrap().unwrap();

        let (replica, keystore) = setup(true).await;
        // same key material, so the replica's owner keystore knows the writer
        assert!(keystore.has_key(&entry.identity.id).await.unwrap());
        assert!(replica.append(entry.clone()).await.unwrap());
        assert!(!replica.append(entry.clone()).await.unwrap());

        let mut tampered = entry;
        tampered.payload.data = json!("y");
        assert!(matches!(
            replica.append(tampered).await,
            Err(LogError::InvalidEntry(_))
        ));
    }
}
