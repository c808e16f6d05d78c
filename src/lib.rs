//! Volunteer Check-in Library
//!
//! Face-matched attendance for volunteer events: a deterministic matcher, an
//! idempotent attendance ledger, and the live-stream, group-photo and
//! registration flows built on them.
//!
//! ## Modules
//!
//! - [`domain`] - Identities, events and attendance records
//! - [`matcher`] - Nearest-identity matching by Euclidean distance
//! - [`infra`] - Document stores (in-memory, SQLite) and the ledger
//! - [`face`] - Face detection/embedding boundary and frame annotation
//! - [`driver`] - Registration, live stream, group photo and descriptor flows
//! - [`auth`] - JWT authentication
//! - [`metrics`] - Counters, gauges and histograms
//! - [`telemetry`] - Logging and OpenTelemetry setup
//! - [`api`] - REST routes

pub mod api;
pub mod auth;
pub mod domain;
pub mod driver;
pub mod face;
pub mod infra;
pub mod matcher;
pub mod metrics;
pub mod migrations;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use domain::{
    AttendanceRecord, Embedding, Event, EventId, Identity, IdentityId, MarkOutcome, MarkRequest,
    VerificationMethod,
};

pub use infra::{AttendanceLedger, CheckinError, DocumentStore, EmbeddingStore, Result};
