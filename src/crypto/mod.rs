//! Cryptographic utilities for the event log
//!
//! Provides:
//! - Canonical JSON content addressing with domain separation
//! - Identity address and key seed derivation
//! - Ed25519 identity signing

mod hash;
mod signing;

pub use hash::*;
pub use signing::*;
