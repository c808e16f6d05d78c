//! Domain models for the check-in service
//!
//! Identities, events with their registration sets, and attendance records.

mod attendance;
mod event;
mod identity;
mod types;

pub use attendance::*;
pub use event::*;
pub use identity::*;
pub use types::*;
