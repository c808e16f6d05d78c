//! Attendance Ledger over a document store
//!
//! `mark_present` keeps one record per (event, identity) whose confidence is a
//! high-water mark. Writers for the same pair are serialized in-process by a
//! keyed mutex; across processes the store's insert-if-absent and version
//! compare-and-set do the same job, and a writer that loses either race
//! re-reads and goes through the compare-and-raise path again.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::OwnedMutexGuard;

use crate::domain::{
    attendance_document_id, AttendanceDocument, AttendanceRecord, EventId, IdentityId,
    MarkOutcome, MarkRequest, MarkResult, RegistrationGating,
};

use super::document::{collections, encode_fields};
use super::{AttendanceLedger, CheckinError, DocumentStore, EventRegistry, QueryOp, Result};

const MAX_MARK_ATTEMPTS: usize = 16;

/// One async mutex per key, dropped once nobody holds or waits on it.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            match locks.get(key).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    locks.retain(|_, weak| weak.strong_count() > 0);
                    let mutex = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key.to_string(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Keys with a live lock.
    pub fn active_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

pub struct DocumentAttendanceLedger {
    store: Arc<dyn DocumentStore>,
    events: Arc<dyn EventRegistry>,
    locks: KeyedLocks,
}

impl DocumentAttendanceLedger {
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<dyn EventRegistry>) -> Self {
        Self {
            store,
            events,
            locks: KeyedLocks::new(),
        }
    }

    async fn check_preconditions(&self, request: &MarkRequest) -> Result<()> {
        if !request.confidence.is_finite() {
            return Err(CheckinError::Validation(
                "confidence must be a finite number".into(),
            ));
        }

        let event = self
            .events
            .get_event(&request.event_id)
            .await?
            .ok_or_else(|| CheckinError::EventNotFound(request.event_id.to_string()))?;

        if request.gating == RegistrationGating::Enforced
            && !event.is_registered(&request.identity_id)
        {
            return Err(CheckinError::NotRegistered {
                event_id: request.event_id.to_string(),
                identity_id: request.identity_id.to_string(),
            });
        }
        Ok(())
    }

    async fn decode_all(&self, field: &str, value: &str) -> Result<Vec<AttendanceRecord>> {
        self.store
            .query(collections::ATTENDANCE, field, QueryOp::Eq, json!(value))
            .await?
            .iter()
            .map(|doc| Ok(doc.decode::<AttendanceDocument>()?.into_record()))
            .collect()
    }
}

#[async_trait]
impl AttendanceLedger for DocumentAttendanceLedger {
    async fn mark_present(&self, request: MarkRequest) -> Result<MarkResult> {
        self.check_preconditions(&request).await?;

        let key = attendance_document_id(&request.event_id, &request.identity_id);
        let _guard = self.locks.lock(&key).await;

        for attempt in 0..MAX_MARK_ATTEMPTS {
            match self.store.get(collections::ATTENDANCE, &key).await? {
                None => {
                    let record = AttendanceRecord::first(&request);
                    if self
                        .store
                        .create(collections::ATTENDANCE, &key, encode_fields(&record)?)
                        .await?
                    {
                        tracing::info!(
                            event_id = %request.event_id,
                            identity_id = %request.identity_id,
                            confidence = request.confidence,
                            method = request.method.as_str(),
                            "attendance marked"
                        );
                        return Ok(MarkResult {
                            outcome: MarkOutcome::Created,
                            record,
                        });
                    }
                }
                Some(doc) => {
                    let existing = doc.decode::<AttendanceDocument>()?.into_record();
                    if request.confidence <= existing.confidence_score {
                        return Ok(MarkResult {
                            outcome: MarkOutcome::Unchanged,
                            record: existing,
                        });
                    }

                    let raised = existing.raised(&request);
                    if self
                        .store
                        .compare_and_set(
                            collections::ATTENDANCE,
                            &key,
                            doc.version,
                            encode_fields(&raised)?,
                        )
                        .await?
                    {
                        tracing::info!(
                            event_id = %request.event_id,
                            identity_id = %request.identity_id,
                            from = existing.confidence_score,
                            to = raised.confidence_score,
                            "attendance confidence raised"
                        );
                        return Ok(MarkResult {
                            outcome: MarkOutcome::ConfidenceRaised,
                            record: raised,
                        });
                    }
                }
            }

            tracing::debug!(
                event_id = %request.event_id,
                identity_id = %request.identity_id,
                attempt,
                "lost attendance write race, retrying"
            );
        }

        Err(CheckinError::VersionConflict {
            collection: collections::ATTENDANCE.to_string(),
            id: key,
        })
    }

    async fn get_record(
        &self,
        event_id: &EventId,
        identity_id: &IdentityId,
    ) -> Result<Option<AttendanceRecord>> {
        let key = attendance_document_id(event_id, identity_id);
        self.store
            .get(collections::ATTENDANCE, &key)
            .await?
            .map(|doc| Ok(doc.decode::<AttendanceDocument>()?.into_record()))
            .transpose()
    }

    async fn list_for_event(&self, event_id: &EventId) -> Result<Vec<AttendanceRecord>> {
        let mut records = self.decode_all("event_id", event_id.as_str()).await?;
        records.sort_by(|a, b| a.identity_id.cmp(&b.identity_id));
        Ok(records)
    }

    async fn list_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<AttendanceRecord>> {
        let mut records = self.decode_all("identity_id", identity_id.as_str()).await?;
        records.extend(self.decode_all("volunteer_id", identity_id.as_str()).await?);
        records.sort_by(|a, b| a.event_id.cmp(&b.event_id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, VerificationMethod};
    use crate::infra::{DocumentEventRegistry, InMemoryDocumentStore, MockEventRegistry};
    use chrono::{Duration, Utc};

    async fn ledger_with_event(registered: &[&str]) -> (Arc<InMemoryDocumentStore>, DocumentAttendanceLedger) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let events = Arc::new(DocumentEventRegistry::new(store.clone()));
        events
            .create_event(
                Event::new("e1".into(), None)
                    .with_registrations(registered.iter().map(|id| IdentityId::from(*id))),
            )
            .await
            .unwrap();
        (store.clone(), DocumentAttendanceLedger::new(store, events))
    }

    fn mark(identity: &str, confidence: f64) -> MarkRequest {
        MarkRequest::new("e1".into(), identity.into(), confidence, VerificationMethod::LiveStream)
    }

    #[tokio::test]
    async fn test_create_raise_unchanged() {
        let (_, ledger) = ledger_with_event(&["v1"]).await;

        let first = ledger.mark_present(mark("v1", 91.0)).await.unwrap();
        assert_eq!(first.outcome, MarkOutcome::Created);
        assert_eq!(first.record.first_marked_at, first.record.last_updated_at);

        let later = Utc::now() + Duration::seconds(10);
        let raised = ledger.mark_present(mark("v1", 95.0).at(later)).await.unwrap();
        assert_eq!(raised.outcome, MarkOutcome::ConfidenceRaised);
        assert_eq!(raised.record.confidence_score, 95.0);
        assert_eq!(raised.record.first_marked_at, first.record.first_marked_at);
        assert_eq!(raised.record.last_updated_at, later);

        let same = ledger.mark_present(mark("v1", 95.0)).await.unwrap();
        assert_eq!(same.outcome, MarkOutcome::Unchanged);
        let lower = ledger.mark_present(mark("v1", 92.0)).await.unwrap();
        assert_eq!(lower.outcome, MarkOutcome::Unchanged);
        assert_eq!(lower.record.confidence_score, 95.0);
    }

    #[tokio::test]
    async fn test_preconditions() {
        let (_, ledger) = ledger_with_event(&["v1"]).await;

        let err = ledger
            .mark_present(MarkRequest::new(
                "missing".into(),
                "v1".into(),
                99.0,
                VerificationMethod::BatchPhoto,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckinError::EventNotFound(_)));

        let err = ledger.mark_present(mark("v9", 99.0)).await.unwrap_err();
        assert!(matches!(err, CheckinError::NotRegistered { .. }));

        let open = ledger
            .mark_present(mark("v9", 99.0).gating(RegistrationGating::Open))
            .await
            .unwrap();
        assert_eq!(open.outcome, MarkOutcome::Created);

        let err = ledger.mark_present(mark("v1", f64::NAN)).await.unwrap_err();
        assert!(matches!(err, CheckinError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_marks_keep_one_record_with_max() {
        let (store, ledger) = ledger_with_event(&["v1"]).await;
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.mark_present(mark("v1", 80.0 + i as f64)).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().outcome == MarkOutcome::Created {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.len(collections::ATTENDANCE).await, 1);
        let record = ledger.get_record(&"e1".into(), &"v1".into()).await.unwrap().unwrap();
        assert_eq!(record.confidence_score, 99.0);
        assert_eq!(ledger.locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_legacy_record_is_raised_in_current_shape() {
        let (store, ledger) = ledger_with_event(&["v1"]).await;
        let key = attendance_document_id(&"e1".into(), &"v1".into());
        store
            .set(
                collections::ATTENDANCE,
                &key,
                json!({
                    "event_id": "e1",
                    "volunteer_id": "v1",
                    "timestamp": "2024-03-01T10:00:00Z",
                    "confidence_score": 90.5
                }),
            )
            .await
            .unwrap();

        let history = ledger.list_for_identity(&"v1".into()).await.unwrap();
        assert_eq!(history.len(), 1);

        let result = ledger.mark_present(mark("v1", 97.0)).await.unwrap();
        assert_eq!(result.outcome, MarkOutcome::ConfidenceRaised);

        let doc = store.get(collections::ATTENDANCE, &key).await.unwrap().unwrap();
        assert_eq!(doc.fields["identity_id"], "v1");
        assert!(doc.fields.get("volunteer_id").is_none());
    }

    #[tokio::test]
    async fn test_listing_is_ordered() {
        let (_, ledger) = ledger_with_event(&["v2", "v1"]).await;
        ledger.mark_present(mark("v2", 91.0)).await.unwrap();
        ledger.mark_present(mark("v1", 93.0)).await.unwrap();

        let records = ledger.list_for_event(&"e1".into()).await.unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
        assert!(ledger.list_for_event(&"e2".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_failure_propagates() {
        let mut events = MockEventRegistry::new();
        events
            .expect_get_event()
            .returning(|_| Err(CheckinError::Timeout("store.get".into())));

        let ledger =
            DocumentAttendanceLedger::new(Arc::new(InMemoryDocumentStore::new()), Arc::new(events));
        let err = ledger.mark_present(mark("v1", 95.0)).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
