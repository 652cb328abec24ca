//! PostgreSQL sink
//!
//! Mirrors log entries into the `events` table and appends metrics windows to
//! `event_sync_metrics`. Each upsert inside a transaction runs under its own
//! savepoint so a failed statement can be retried without aborting the batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{FromRow, Transaction};

use crate::domain::{Metadata, SyncMetricsSnapshot, SyncedEvent};
use crate::infra::{EventSink, SinkError, SinkResult, SinkTransaction};

const UPSERT_EVENT: &str = r#"
    INSERT INTO events (id, data, timestamp, metadata)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (id) DO UPDATE
    SET data = EXCLUDED.data,
        timestamp = EXCLUDED.timestamp,
        metadata = EXCLUDED.metadata
"#;

fn metadata_json(metadata: &Metadata) -> SinkResult<serde_json::Value> {
    serde_json::to_value(metadata).map_err(|e| SinkError::InvalidData(e.to_string()))
}

/// PostgreSQL-backed event sink
#[derive(Clone)]
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create from connection string
    pub async fn from_url(url: &str) -> SinkResult<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    data: serde_json::Value,
    timestamp: i64,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<EventRow> for SyncedEvent {
    type Error = SinkError;

    fn try_from(row: EventRow) -> SinkResult<Self> {
        let metadata = match row.metadata {
            Some(value) if !value.is_null() => serde_json::from_value(value)
                .map_err(|e| SinkError::InvalidData(format!("metadata of {}: {e}", row.id)))?,
            _ => Metadata::new(),
        };
        Ok(SyncedEvent {
            id: row.id,
            data: row.data,
            timestamp: row.timestamp,
            metadata,
        })
    }
}

#[derive(Debug, FromRow)]
struct MetricsRow {
    timestamp: DateTime<Utc>,
    total_events: i64,
    synced_events: i64,
    failed_events: i64,
    retry_count: i64,
    avg_sync_time: f64,
    batch_size: i64,
    last_synced_hash: Option<String>,
}

impl From<MetricsRow> for SyncMetricsSnapshot {
    fn from(row: MetricsRow) -> Self {
        Self {
            timestamp: row.timestamp,
            total_events: row.total_events.max(0) as u64,
            synced_events: row.synced_events.max(0) as u64,
            failed_events: row.failed_events.max(0) as u64,
            retry_count: row.retry_count.max(0) as u64,
            avg_sync_time_ms: row.avg_sync_time,
            batch_size: row.batch_size.max(0) as u64,
            last_synced_hash: row.last_synced_hash,
        }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn begin(&self) -> SinkResult<Box<dyn SinkTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSinkTransaction { tx }))
    }

    async fn upsert_event(&self, event: &SyncedEvent) -> SinkResult<()> {
        sqlx::query(UPSERT_EVENT)
            .bind(&event.id)
            .bind(&event.data)
            .bind(event.timestamp)
            .bind(metadata_json(&event.metadata)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_event(&self, id: &str) -> SinkResult<Option<SyncedEvent>> {
        let row: Option<EventRow> = sqlx::query_as(
            "SELECT id, data, timestamp, metadata FROM events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncedEvent::try_from).transpose()
    }

    async fn save_metrics(&self, snapshot: &SyncMetricsSnapshot) -> SinkResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_sync_metrics (
                timestamp, total_events, synced_events, failed_events,
                retry_count, avg_sync_time, batch_size, last_synced_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(snapshot.timestamp)
        .bind(snapshot.total_events as i64)
        .bind(snapshot.synced_events as i64)
        .bind(snapshot.failed_events as i64)
        .bind(snapshot.retry_count as i64)
        .bind(snapshot.avg_sync_time_ms)
        .bind(snapshot.batch_size as i64)
        .bind(&snapshot.last_synced_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_metrics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: usize,
    ) -> SinkResult<Vec<SyncMetricsSnapshot>> {
        let rows: Vec<MetricsRow> = sqlx::query_as(
            r#"
            SELECT timestamp, total_events, synced_events, failed_events,
                   retry_count, avg_sync_time, batch_size,
                   last_synced_hash
            FROM event_sync_metrics
            WHERE ($1::TIMESTAMPTZ IS NULL OR timestamp >= $1)
              AND ($2::TIMESTAMPTZ IS NULL OR timestamp <= $2)
            ORDER BY timestamp ASC
            LIMIT $3
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn health_check(&self) -> SinkResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open PostgreSQL transaction
pub struct PgSinkTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SinkTransaction for PgSinkTransaction {
    async fn upsert_event(&mut self, event: &SyncedEvent) -> SinkResult<()> {
        let metadata = metadata_json(&event.metadata)?;
        let mut savepoint = sqlx::Connection::begin(&mut *self.tx).await?;

        let result = sqlx::query(UPSERT_EVENT)
            .bind(&event.id)
            .bind(&event.data)
            .bind(event.timestamp)
            .bind(metadata)
            .execute(&mut *savepoint)
            .await;

        match result {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(())
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn commit(self: Box<Self>) -> SinkResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> SinkResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
