//! Sync metrics
//!
//! - [`SyncMetrics`]: windowed counters fed by the sync engine
//! - [`MetricsReporter`]: closes a window every interval (default 60s) and
//!   persists it through the sink

mod aggregator;
mod reporter;

pub use aggregator::*;
pub use reporter::*;
