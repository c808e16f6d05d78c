//! SQLite implementation of the document store
//!
//! Documents live in one `documents` table keyed by `(collection, id)`;
//! fields are stored as JSON text next to a version counter.

mod document_store;

pub use document_store::*;
