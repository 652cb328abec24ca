//! PostgreSQL implementations for the relational mirror

mod event_sink;

pub use event_sink::*;
