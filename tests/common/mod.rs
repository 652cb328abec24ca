//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use eventlog_sync::auth::{
    AccessController, IdentityProvider, InMemoryKeystore, Keystore,
};
use eventlog_sync::domain::{AccessPolicy, EventPayload, Identity, PeerRole};
use eventlog_sync::infra::{InMemoryEventSink, RetryConfig};
use eventlog_sync::log::{EventLog, InMemoryEventLog};
use eventlog_sync::sync::{SyncConfig, SyncEngine};

/// Key material of the default test writer
pub const WRITER_KEY: &str = "0x7f3a9c2e";

/// Key material of a writer that is not in the policy
pub const OUTSIDER_KEY: &str = "0xdeadbeef";

/// A log, its writer identity and access controller over a shared keystore
pub struct TestLog {
    pub log: Arc<InMemoryEventLog>,
    pub writer: Identity,
    pub access: Arc<AccessController>,
    pub keystore: Arc<dyn Keystore>,
}

/// Build a log whose writer is (or is not) admitted by the policy
pub async fn test_log(writer_key: &str, authorized: bool) -> TestLog {
    test_log_with_capacity(writer_key, authorized, 1024).await
}

pub async fn test_log_with_capacity(
    writer_key: &str,
    authorized: bool,
    notify_capacity: usize,
) -> TestLog {
    let keystore: Arc<dyn Keystore> = Arc::new(InMemoryKeystore::new());
    let writer = IdentityProvider::new(keystore.clone())
        .create_identity(writer_key)
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
    let log = Arc::new(InMemoryEventLog::with_capacity(
        "test-log",
        writer.clone(),
        access.clone(),
        notify_capacity,
    ));
    TestLog {
        log,
        writer,
        access,
        keystore,
    }
}

/// Engine defaults for tests: immediate retries, long metrics window
pub fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry(RetryConfig::immediate(3))
        .with_metrics_interval(Duration::from_secs(3600))
}

pub fn test_engine(log: &Arc<InMemoryEventLog>, sink: &InMemoryEventSink, config: SyncConfig) -> SyncEngine {
    let log: Arc<dyn EventLog> = log.clone();
    SyncEngine::new(config, log, Arc::new(sink.clone())).unwrap()
}

/// Order-like payload number `n`
pub fn order_payload(n: usize) -> EventPayload {
    EventPayload::new(json!({
        "order_id": format!("order-{n:04}"),
        "total_amount": n as f64 * 10.0,
        "currency": "USD",
    }))
    .with_timestamp(1_700_000_000_000 + n as i64)
    .with_metadata("source", if n % 2 == 0 { "pos" } else { "web" })
}

/// Append `count` payloads, returning their hashes in order
pub async fn append_orders(log: &InMemoryEventLog, start: usize, count: usize) -> Vec<String> {
    let mut hashes = Vec::with_capacity(count);
    for n in start..start + count {
        hashes.push(log.add(order_payload(n)).await.unwrap());
    }
    hashes
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
