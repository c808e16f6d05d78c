//! Infrastructure layer for the check-in service
//!
//! Contains trait definitions and implementations for:
//! - Document storage (in-memory, SQLite) with a deadline decorator
//! - Embedding Store (enrolled identities)
//! - Event registry (events and registration sets)
//! - Attendance Ledger (idempotent `mark_present`)
//! - Retry with backoff for external calls
//! - Graceful shutdown

mod document;
mod error;
mod events;
mod graceful_shutdown;
mod identities;
mod ledger;
mod memory;
mod retry;
pub mod sqlite;
mod timed;
mod traits;

pub use document::{collections, encode_fields, Document, QueryOp};
pub use error::*;
pub use events::DocumentEventRegistry;
pub use graceful_shutdown::{
    shutdown_signal, ShutdownCoordinator, ShutdownSignal, StreamGuard, StreamTracker,
};
pub use identities::DocumentEmbeddingStore;
pub use ledger::{DocumentAttendanceLedger, KeyedLocks};
pub use memory::InMemoryDocumentStore;
pub use retry::{Retry, RetryConfig};
pub use sqlite::SqliteDocumentStore;
pub use timed::TimedDocumentStore;
pub use traits::*;
