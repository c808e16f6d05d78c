//! Attendance ledger integration tests against the in-memory and SQLite stores

use serde_json::json;
use std::sync::Arc;

use volunteer_checkin::domain::{
    attendance_document_id, Event, EventId, IdentityId, MarkOutcome, MarkRequest,
    RegistrationGating, VerificationMethod,
};
use volunteer_checkin::infra::{
    collections, AttendanceLedger, CheckinError, DocumentAttendanceLedger, DocumentEventRegistry,
    DocumentStore, EventRegistry, InMemoryDocumentStore, SqliteDocumentStore,
};
use volunteer_checkin::matcher::{best_match, Candidate};
use volunteer_checkin::Embedding;

async fn ledger_over(
    store: Arc<dyn DocumentStore>,
    registered: &[&str],
) -> Arc<DocumentAttendanceLedger> {
    let events = Arc::new(DocumentEventRegistry::new(store.clone()));
    events
        .create_event(
            Event::new(EventId::from("e1"), Some("Beach cleanup".into()))
                .with_registrations(registered.iter().map(|id| IdentityId::from(*id))),
        )
        .await
        .unwrap();
    Arc::new(DocumentAttendanceLedger::new(store, events))
}

async fn memory_ledger(registered: &[&str]) -> Arc<DocumentAttendanceLedger> {
    ledger_over(Arc::new(InMemoryDocumentStore::new()), registered).await
}

async fn sqlite_ledger(registered: &[&str]) -> Arc<DocumentAttendanceLedger> {
    let store = SqliteDocumentStore::connect("sqlite::memory:", 1)
        .await
        .unwrap();
    ledger_over(Arc::new(store), registered).await
}

fn mark(identity: &str, confidence: f64) -> MarkRequest {
    MarkRequest::new(
        "e1".into(),
        identity.into(),
        confidence,
        VerificationMethod::BatchPhoto,
    )
}

async fn concurrent_marks_keep_one_record(ledger: Arc<DocumentAttendanceLedger>) {
    let mut handles = Vec::new();
    for i in 0..32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .mark_present(mark("v1", 60.0 + i as f64))
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().outcome == MarkOutcome::Created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let records = ledger.list_for_event(&EventId::from("e1")).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].confidence_score, 91.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_marks_in_memory() {
    concurrent_marks_keep_one_record(memory_ledger(&["v1"]).await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_marks_sqlite() {
    concurrent_marks_keep_one_record(sqlite_ledger(&["v1"]).await).await;
}

#[tokio::test]
async fn test_near_match_respects_live_and_strict_thresholds() {
    let ledger = memory_ledger(&["v1"]).await;
    let candidates = vec![Candidate::new("v1", Embedding::new(vec![0.0, 0.0, 0.0]))];
    let query = Embedding::new(vec![0.0, 0.0, 0.1]);

    // Distance 0.1 is confidence 90: exactly at the live threshold.
    let live = best_match(&query, &candidates, 90.0).unwrap().unwrap();
    assert_eq!(live.identity_id.as_str(), "v1");
    let result = ledger
        .mark_present(mark("v1", live.confidence))
        .await
        .unwrap();
    assert_eq!(result.outcome, MarkOutcome::Created);
    assert!((result.record.confidence_score - 90.0).abs() < 1e-9);

    assert!(best_match(&query, &candidates, 99.0).unwrap().is_none());
}

#[tokio::test]
async fn test_gating_and_missing_event() {
    let ledger = memory_ledger(&["v1"]).await;

    let err = ledger.mark_present(mark("v2", 95.0)).await.unwrap_err();
    assert!(matches!(err, CheckinError::NotRegistered { .. }));
    assert!(ledger
        .get_record(&"e1".into(), &"v2".into())
        .await
        .unwrap()
        .is_none());

    let open = ledger
        .mark_present(mark("v2", 95.0).gating(RegistrationGating::Open))
        .await
        .unwrap();
    assert_eq!(open.outcome, MarkOutcome::Created);

    let missing = MarkRequest::new(
        "nope".into(),
        "v1".into(),
        95.0,
        VerificationMethod::Manual,
    );
    assert!(matches!(
        ledger.mark_present(missing).await.unwrap_err(),
        CheckinError::EventNotFound(_)
    ));
}

#[tokio::test]
async fn test_legacy_documents_are_read_and_upgraded() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let ledger = ledger_over(store.clone(), &["v1"]).await;

    let key = attendance_document_id(&"e1".into(), &"v1".into());
    store
        .set(
            collections::ATTENDANCE,
            &key,
            json!({
                "event_id": "e1",
                "volunteer_id": "v1",
                "timestamp": "2024-03-01T09:00:00.250000",
                "confidence_score": 92.5
            }),
        )
        .await
        .unwrap();

    let legacy = ledger
        .get_record(&"e1".into(), &"v1".into())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(legacy.identity_id.as_str(), "v1");
    assert_eq!(legacy.confidence_score, 92.5);
    assert_eq!(legacy.verification_method, VerificationMethod::LiveStream);

    assert_eq!(
        ledger.mark_present(mark("v1", 90.0)).await.unwrap().outcome,
        MarkOutcome::Unchanged
    );

    let raised = ledger.mark_present(mark("v1", 97.0)).await.unwrap();
    assert_eq!(raised.outcome, MarkOutcome::ConfidenceRaised);
    assert_eq!(raised.record.first_marked_at, legacy.first_marked_at);

    let doc = store.get(collections::ATTENDANCE, &key).await.unwrap().unwrap();
    assert_eq!(doc.fields["identity_id"], "v1");

    let history = ledger.list_for_identity(&"v1".into()).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_event_listing_reads_legacy_records_beside_new_ones() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let ledger = ledger_over(store.clone(), &["v1", "v2"]).await;

    store
        .set(
            collections::ATTENDANCE,
            &attendance_document_id(&"e1".into(), &"v1".into()),
            json!({
                "event_id": "e1",
                "volunteer_id": "v1",
                "timestamp": "2024-03-01T09:00:00",
                "confidence_score": 88.0,
                "verification_method": "batch_photo"
            }),
        )
        .await
        .unwrap();
    ledger.mark_present(mark("v2", 75.0)).await.unwrap();

    let records = ledger.list_for_event(&"e1".into()).await.unwrap();
    assert_eq!(records.len(), 2);
    let legacy = records
        .iter()
        .find(|r| r.identity_id.as_str() == "v1")
        .unwrap();
    assert_eq!(legacy.confidence_score, 88.0);
    assert_eq!(legacy.verification_method, VerificationMethod::BatchPhoto);
    assert_eq!(
        legacy.first_marked_at.to_rfc3339(),
        "2024-03-01T09:00:00+00:00"
    );
}

#[tokio::test]
async fn test_sqlite_history_across_events() {
    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteDocumentStore::connect("sqlite::memory:", 1)
            .await
            .unwrap(),
    );
    let events = Arc::new(DocumentEventRegistry::new(store.clone()));
    for id in ["e1", "e2"] {
        events
            .create_event(Event::new(id.into(), None).with_registrations(["v1".into()]))
            .await
            .unwrap();
    }
    let ledger = DocumentAttendanceLedger::new(store, events);

    for id in ["e2", "e1"] {
        ledger
            .mark_present(MarkRequest::new(
                id.into(),
                "v1".into(),
                93.0,
                VerificationMethod::LiveStream,
            ))
            .await
            .unwrap();
    }

    let history = ledger.list_for_identity(&"v1".into()).await.unwrap();
    let ids: Vec<_> = history.iter().map(|r| r.event_id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert!(ledger.list_for_event(&"e3".into()).await.unwrap().is_empty());
}
