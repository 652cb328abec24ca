//! Domain models for the event log and its relational mirror
//!
//! Core types for log entries, writer identities, access policy and
//! synchronization bookkeeping.

mod event;
mod identity;
mod sync;

pub use event::*;
pub use identity::*;
pub use sync::*;
