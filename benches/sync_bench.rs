//! Performance benchmarks for eventlog-sync.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;

use eventlog_sync::auth::{AccessController, IdentityProvider, InMemoryKeystore, Keystore};
use eventlog_sync::crypto::{canonicalize_json, entry_hash};
use eventlog_sync::domain::{AccessPolicy, Batch, EventPayload, LogEntry, PeerRole};
use eventlog_sync::infra::{InMemoryEventSink, RetryConfig};
use eventlog_sync::log::{EventLog, InMemoryEventLog, IterOptions};
use eventlog_sync::metrics::SyncMetrics;
use eventlog_sync::sync::BatchProcessor;

fn order_payload(i: usize) -> serde_json::Value {
    json!({
        "order_id": format!("order-{i}"),
        "customer_id": format!("cust-{i}"),
        "total_amount": i as f64 * 10.0,
        "items": [
            {"sku": "SKU-001", "quantity": 1, "price": 9.99},
            {"sku": "SKU-002", "quantity": 2, "price": 19.99}
        ]
    })
}

/// Build a log holding `count` entries and return them
async fn create_entries(count: usize) -> Vec<LogEntry> {
    let keystore: Arc<dyn Keystore> = Arc::new(InMemoryKeystore::new());
    let writer = IdentityProvider::new(keystore.clone())
        .create_identity("0x7f3a9c2e")
        .await
        .unwrap();
    let access = Arc::new(AccessController::new(
        AccessPolicy::new([writer.id.clone()]),
        keystore,
        PeerRole::Owner,
    ));
    let log = InMemoryEventLog::new("bench", writer, access);
    for i in 0..count {
        log.add(EventPayload::new(order_payload(i)).with_metadata("source", "pos"))
            .await
            .unwrap();
    }
    log.iter(IterOptions::default()).await.unwrap()
}

/// Benchmark content addressing of entries
fn bench_entry_hash(c: &mut Criterion) {
    let payload = order_payload(42);

    c.bench_function("canonicalize_json", |b| {
        b.iter(|| black_box(canonicalize_json(black_box(&payload)).unwrap()))
    });

    c.bench_function("entry_hash", |b| {
        b.iter(|| black_box(entry_hash(black_box(&payload), "0xabc", 7).unwrap()))
    });
}

/// Benchmark appends through the access controller
fn bench_log_append(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("log_append");

    for count in [10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("add", count), count, |b, &count| {
            b.to_async(&rt).iter(|| async move { black_box(create_entries(count).await) });
        });
    }

    group.finish();
}

/// Benchmark transactional batch commits into the in-memory sink
fn bench_batch_commit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("batch_commit");

    for size in [10, 100, 500].iter() {
        let entries = rt.block_on(create_entries(*size));
        let sink = Arc::new(InMemoryEventSink::new());
        let processor = BatchProcessor::new(
            sink,
            Arc::new(SyncMetrics::new()),
            RetryConfig::immediate(0),
        );

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("process_batch", size), size, |b, _| {
            b.to_async(&rt).iter(|| async {
                let batch = Batch::new(entries.clone());
                processor.process_batch(&batch).await.unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_entry_hash, bench_log_append, bench_batch_commit);
criterion_main!(benches);
