//! Infrastructure layer
//!
//! Contains trait definitions and implementations for:
//! - Durable sinks (PostgreSQL, in-memory with fault injection)
//! - Retry with exponential backoff
//! - Graceful shutdown

mod error;
mod graceful_shutdown;
mod memory_sink;
pub mod postgres;
pub mod retry;
mod traits;

pub use error::*;
pub use graceful_shutdown::{shutdown_signal, ShutdownCoordinator, ShutdownSignal};
pub use memory_sink::{InMemoryEventSink, InMemorySinkTransaction};
pub use postgres::{PgEventSink, PgSinkTransaction};
pub use retry::{is_retryable_db_error, Retry, RetryConfig, RetryResult};
pub use traits::*;
