//! Identity and write authorization for the event log
//!
//! - **Keystore**: scoped storage of identity signing keys (in-memory or
//!   directory-backed)
//! - **Identity provider**: derives identities from key material, signs, and
//!   verifies received identities (fail closed)
//! - **Access controller**: the writer policy of one log and the admission
//!   decision for candidate appends
//!
//! # Configuration
//!
//! - `IDENTITY_KEY`: hex key material of the local writer identity
//! - `KEYSTORE_DIR`: directory for the file keystore (in-memory when unset)
//! - `LOG_WRITERS`: comma-separated writer ids granted at startup

mod access;
mod identity;
mod keystore;

pub use access::*;
pub use identity::*;
pub use keystore::*;
