//! Log entries and their relational projection

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::Identity;

/// String metadata attached to an event, kept sorted for stable hashing
pub type Metadata = BTreeMap<String, String>;

/// Application payload of a log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Arbitrary JSON document
    pub data: serde_json::Value,

    /// Author-supplied timestamp in milliseconds since the Unix epoch
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl EventPayload {
    /// Create a payload stamped with the current time
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            timestamp: Utc::now().timestamp_millis(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when every `filter` pair is present with the same value
    pub fn matches_metadata(&self, filter: &Metadata) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|mine| mine == v))
    }
}

/// An immutable, content-addressed entry of the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Content address (lowercase hex, no prefix)
    pub hash: String,

    pub payload: EventPayload,

    /// Identity of the writer that appended the entry
    pub identity: Identity,

    /// Logical append position within the log
    pub clock: u64,
}

impl LogEntry {
    /// Row written to the relational sink for this entry
    pub fn to_synced_event(&self) -> SyncedEvent {
        SyncedEvent {
            id: self.hash.clone(),
            data: self.payload.data.clone(),
            timestamp: self.payload.timestamp,
            metadata: self.payload.metadata.clone(),
        }
    }
}

/// Relational projection of a log entry; the primary key is the entry hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEvent {
    pub id: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_filter() {
        let payload = EventPayload::new(json!({"n": 1}))
            .with_metadata("source", "pos")
            .with_metadata("region", "eu");

        let mut filter = Metadata::new();
        assert!(payload.matches_metadata(&filter));

        filter.insert("source".into(), "pos".into());
        assert!(payload.matches_metadata(&filter));

        filter.insert("region".into(), "us".into());
        assert!(!payload.matches_metadata(&filter));
    }

    #[test]
    fn test_empty_metadata_omitted_on_wire() {
        let payload = EventPayload::new(json!(1)).with_timestamp(5);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"data": 1, "timestamp": 5}));

        let parsed: EventPayload = serde_json::from_value(value).unwrap();
        assert!(parsed.metadata.is_empty());
    }
}
