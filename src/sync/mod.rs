//! Synchronization of the event log into a durable sink
//!
//! - [`SyncEngine`] owns the lifecycle and the batching loop
//! - [`BatchProcessor`] commits one batch per transaction with per-event retry
//! - [`SyncConfig`] holds batching, retry and metrics settings

mod config;
mod engine;
mod history;
mod processor;

pub use config::*;
pub use engine::{FlushReport, SyncEngine};
pub use history::{BatchHistory, RecentHashes};
pub use processor::BatchProcessor;
