//! eventlog-sync library
//!
//! Mirrors an access-controlled, append-only event log into PostgreSQL
//! with batching, bounded retries and windowed metrics.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (payloads, entries, identities, batches)
//! - [`crypto`] - Content hashing and Ed25519 signing
//! - [`auth`] - Identity provider, keystores and the access controller
//! - [`log`] - The append-only log interface and an in-memory log
//! - [`infra`] - Sinks (PostgreSQL, in-memory), errors, retry, shutdown
//! - [`sync`] - The sync engine and batch processor
//! - [`metrics`] - Windowed sync metrics and their reporter
//! - [`telemetry`] - Logging setup
//! - [`api`] - REST API routes

pub mod api;
pub mod auth;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod log;
pub mod metrics;
pub mod migrations;
pub mod server;
pub mod sync;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    AccessPolicy, Batch, BatchState, BatchStatus, EventPayload, Identity, LogEntry, PeerRole,
    SyncMetricsSnapshot, SyncState, SyncStatus, SyncedEvent,
};

pub use auth::{AccessController, IdentityProvider};
pub use infra::{EventSink, InMemoryEventSink, PgEventSink, Result, SinkError, SyncError};
pub use log::{EventLog, InMemoryEventLog, IterOptions, LogError};
pub use sync::{SyncConfig, SyncEngine};
