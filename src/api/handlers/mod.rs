//! REST API handlers organized by domain.

pub mod access;
pub mod events;
pub mod health;
pub mod sync;

pub use access::*;
pub use events::*;
pub use health::*;
pub use sync::*;
