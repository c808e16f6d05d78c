//! Trait definitions for the check-in service's stores

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::domain::{
    AttendanceRecord, EnrollOutcome, Event, EventId, Identity, IdentityId, IdentityProfile,
    MarkRequest, MarkResult,
};
use crate::matcher::Candidate;

use super::{Document, QueryOp, Result};

/// Document-oriented persistence collaborator.
///
/// Exactly-once delivery is not assumed; callers that need idempotency build
/// it on `create` and `compare_and_set`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. Absence is `None`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Write a document unconditionally, replacing any previous fields.
    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<Document>;

    /// Shallow-merge fields into an existing document. Returns false if absent.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool>;

    /// Insert only if no document exists under `id`. Returns whether it was inserted.
    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<bool>;

    /// Replace the fields only if the stored version equals `expected_version`.
    async fn compare_and_set(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        fields: Value,
    ) -> Result<bool>;

    /// Remove a document. Returns whether one was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;

    /// Documents whose top-level `field` satisfies `op` against `value`, ordered by id.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Value,
    ) -> Result<Vec<Document>>;

    /// Every document in a collection, ordered by id.
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Cheap round trip used by readiness checks.
    async fn ping(&self) -> Result<()>;
}

/// Embedding Store: enrolled identities and their single embedding.
///
/// Invariant: every stored embedding has the deployment's dimensionality.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Enroll an identity, replacing any previous record for the same id wholesale.
    async fn enroll(&self, identity: Identity) -> Result<EnrollOutcome>;

    /// Load an identity including its reference photo.
    async fn get(&self, identity_id: &IdentityId) -> Result<Option<Identity>>;

    /// Load an identity without its reference photo.
    async fn get_profile(&self, identity_id: &IdentityId) -> Result<Option<IdentityProfile>>;

    /// Reference photo bytes, if any were stored.
    async fn reference_image(&self, identity_id: &IdentityId) -> Result<Option<Vec<u8>>>;

    /// All enrolled identities, ordered by id.
    async fn list_profiles(&self) -> Result<Vec<IdentityProfile>>;

    /// Matching candidates. `None` means every enrolled identity.
    async fn candidates(&self, restrict_to: Option<BTreeSet<IdentityId>>)
        -> Result<Vec<Candidate>>;

    /// Change display name and contact. Returns false if the identity is unknown.
    async fn update_profile(
        &self,
        identity_id: &IdentityId,
        display_name: Option<String>,
        contact: Option<String>,
    ) -> Result<bool>;

    /// Dimensionality pinned for this deployment, if any identity has been enrolled.
    async fn dimension(&self) -> Result<Option<usize>>;
}

/// Events and their registration sets.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventRegistry: Send + Sync {
    /// Create an event. Fails with `AlreadyExists` if the id is taken.
    async fn create_event(&self, event: Event) -> Result<Event>;

    async fn get_event(&self, event_id: &EventId) -> Result<Option<Event>>;

    /// Add identities to an event's registration set. Returns the updated event.
    async fn register_identities(
        &self,
        event_id: &EventId,
        identity_ids: Vec<IdentityId>,
    ) -> Result<Event>;

    /// All events, ordered by id.
    async fn list_events(&self) -> Result<Vec<Event>>;

    /// Events whose registration set contains the identity.
    async fn events_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<Event>>;
}

/// Attendance Ledger: at most one record per (event, identity).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AttendanceLedger: Send + Sync {
    /// Idempotent high-water-mark transition. Safe to call concurrently.
    async fn mark_present(&self, request: MarkRequest) -> Result<MarkResult>;

    async fn get_record(
        &self,
        event_id: &EventId,
        identity_id: &IdentityId,
    ) -> Result<Option<AttendanceRecord>>;

    /// Records for one event, ordered by identity id.
    async fn list_for_event(&self, event_id: &EventId) -> Result<Vec<AttendanceRecord>>;

    /// Records for one identity, ordered by event id.
    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<AttendanceRecord>>;
}
