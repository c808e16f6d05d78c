//! Group-photo attendance
//!
//! Every face in one photo is embedded through a bounded worker pool, matched
//! independently against the event's registered identities, and marked. Two
//! faces matching the same person are both reported; the ledger collapses
//! them into one record.

use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, instrument};

use super::{record_outcome, validate_threshold, CheckinContext, BATCH_MIN_CONFIDENCE};
use crate::domain::{
    AttendanceRecord, Embedding, EventId, IdentityId, MarkOutcome, MarkRequest,
    RegistrationGating, VerificationMethod,
};
use crate::face::{FaceImage, FaceRegion};
use crate::infra::{CheckinError, Result};
use crate::matcher::{display_confidence, match_many};
use crate::metrics::metric_names;

/// Outcome for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFaceResult {
    pub face_index: usize,
    pub region: FaceRegion,
    pub identity_id: Option<IdentityId>,
    pub confidence: Option<f64>,
    pub outcome: Option<MarkOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub event_id: EventId,
    pub total_faces: usize,
    /// Faces that matched someone, duplicates included.
    pub matches_found: usize,
    /// One record per identity created or raised by this call.
    pub attendance_marked: Vec<AttendanceRecord>,
    pub results: Vec<BatchFaceResult>,
}

pub struct BatchProcessor {
    ctx: CheckinContext,
    workers: usize,
}

impl BatchProcessor {
    pub fn new(ctx: CheckinContext, workers: usize) -> Self {
        Self {
            ctx,
            workers: workers.max(1),
        }
    }

    /// Process one group photo for `event_id`.
    ///
    /// Capability and store failures fail the whole call; records already
    /// written stay written.
    #[instrument(skip(self, photo), fields(bytes = photo.len()))]
    pub async fn process(
        &self,
        event_id: &EventId,
        photo: Bytes,
        min_confidence: Option<f64>,
    ) -> Result<BatchSummary> {
        let start = Instant::now();
        let min_confidence = validate_threshold(min_confidence.unwrap_or(BATCH_MIN_CONFIDENCE))?;
        let metrics = &self.ctx.metrics;

        let event = self.ctx.require_event(event_id).await?;
        let image = FaceImage::decode_blocking(photo).await?;
        let regions = self.ctx.faces.detect_regions(&image).await?;

        metrics.inc_counter(metric_names::BATCH_PHOTOS).await;
        metrics
            .add_counter(metric_names::FACES_DETECTED, regions.len() as u64)
            .await;
        metrics
            .observe_histogram(metric_names::BATCH_FACES_PER_PHOTO, regions.len() as f64)
            .await;

        let mut results: Vec<BatchFaceResult> = regions
            .iter()
            .enumerate()
            .map(|(face_index, region)| BatchFaceResult {
                face_index,
                region: *region,
                identity_id: None,
                confidence: None,
                outcome: None,
            })
            .collect();

        let candidates = self
            .ctx
            .candidates_for(&event, RegistrationGating::Enforced)
            .await?;
        if regions.is_empty() || candidates.is_empty() {
            info!(
                faces = regions.len(),
                candidates = candidates.len(),
                "nothing to match"
            );
            return Ok(BatchSummary {
                event_id: event_id.clone(),
                total_faces: regions.len(),
                matches_found: 0,
                attendance_marked: Vec::new(),
                results,
            });
        }

        let ctx = &self.ctx;
        let image = &image;
        let expected = candidates.first().map(|c| c.embedding.dimension());
        let embeddings: Vec<Embedding> = stream::iter(regions.iter().copied())
            .map(|region| async move { ctx.embed_face(image, region, expected).await })
            .buffered(self.workers)
            .try_collect()
            .await?;

        let matches = tokio::task::spawn_blocking(move || {
            match_many(&embeddings, &candidates, min_confidence)
        })
        .await
        .map_err(|e| CheckinError::Internal(format!("match task failed: {e}")))??;

        let mut matches_found = 0;
        let mut marked: BTreeMap<IdentityId, AttendanceRecord> = BTreeMap::new();
        for query in matches {
            let Some(best) = query.best else {
                metrics.inc_counter(metric_names::FACES_UNKNOWN).await;
                continue;
            };
            matches_found += 1;
            metrics.inc_counter(metric_names::FACES_MATCHED).await;
            metrics
                .observe_histogram(
                    metric_names::MATCH_CONFIDENCE,
                    display_confidence(best.confidence),
                )
                .await;

            let request = MarkRequest::new(
                event_id.clone(),
                best.identity_id.clone(),
                best.confidence,
                VerificationMethod::BatchPhoto,
            )
            .gating(RegistrationGating::Enforced);
            let result = match self.ctx.ledger.mark_present(request).await {
                Ok(result) => result,
                Err(e) => {
                    metrics
                        .inc_counter(metric_names::ATTENDANCE_WRITE_FAILURES)
                        .await;
                    return Err(e);
                }
            };
            record_outcome(metrics, result.outcome).await;

            if let Some(slot) = results.get_mut(query.query_index) {
                slot.identity_id = Some(best.identity_id.clone());
                slot.confidence = Some(display_confidence(best.confidence));
                slot.outcome = Some(result.outcome);
            }
            if result.outcome.is_write() {
                marked.insert(best.identity_id, result.record);
            }
        }

        metrics
            .observe_histogram(metric_names::BATCH_LATENCY, start.elapsed().as_secs_f64())
            .await;
        info!(
            total_faces = regions.len(),
            matches_found,
            marked = marked.len(),
            "group photo processed"
        );

        Ok(BatchSummary {
            event_id: event_id.clone(),
            total_faces: regions.len(),
            matches_found,
            attendance_marked: marked.into_values().collect(),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Event, Identity};
    use crate::face::{test_support::png, MockFaceCapability};
    use crate::infra::{
        AttendanceLedger, DocumentAttendanceLedger, DocumentEmbeddingStore,
        DocumentEventRegistry, EmbeddingStore, EventRegistry, InMemoryDocumentStore,
    };
    use crate::metrics::MetricsRegistry;
    use std::sync::Arc;

    async fn context(faces: MockFaceCapability) -> CheckinContext {
        let store = Arc::new(InMemoryDocumentStore::new());
        let events = Arc::new(DocumentEventRegistry::new(store.clone()));
        let identities = Arc::new(DocumentEmbeddingStore::new(store.clone()));
        events
            .create_event(
                Event::new("e1".into(), None)
                    .with_registrations(["v1".into(), "v2".into()]),
            )
            .await
            .unwrap();
        events
            .create_event(Event::new("empty".into(), None))
            .await
            .unwrap();
        for (id, embedding) in [("v1", vec![0.0, 0.0]), ("v2", vec![1.0, 1.0]), ("v3", vec![5.0, 5.0])] {
            identities
                .enroll(Identity::new(id.into(), id, "", Embedding::new(embedding), Vec::new()))
                .await
                .unwrap();
        }
        CheckinContext {
            faces: Arc::new(faces),
            identities,
            events: events.clone(),
            ledger: Arc::new(DocumentAttendanceLedger::new(store, events)),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Faces at x = 0, 10, 20...; the embedding is looked up by region.
    fn faces_with(embeddings: Vec<Vec<f64>>) -> MockFaceCapability {
        let count = embeddings.len() as u32;
        let mut faces = MockFaceCapability::new();
        faces.expect_detect_regions().returning(move |_| {
            Ok((0..count).map(|i| FaceRegion::new(i * 10, 0, 8, 8)).collect())
        });
        faces.expect_embed().returning(move |_, region| {
            Ok(Embedding::new(embeddings[(region.left / 10) as usize].clone()))
        });
        faces
    }

    fn photo() -> Bytes {
        Bytes::from(png(64, 16, [50, 50, 50]))
    }

    #[tokio::test]
    async fn test_duplicate_faces_collapse_to_one_record() {
        let ctx = context(faces_with(vec![vec![0.0, 0.0], vec![0.0, 0.1]])).await;
        let processor = BatchProcessor::new(ctx.clone(), 4);

        let summary = processor.process(&"e1".into(), photo(), None).await.unwrap();
        assert_eq!(summary.total_faces, 2);
        assert_eq!(summary.matches_found, 2);
        assert_eq!(summary.attendance_marked.len(), 1);
        assert_eq!(summary.attendance_marked[0].identity_id.as_str(), "v1");
        assert_eq!(summary.attendance_marked[0].confidence_score, 100.0);
        assert_eq!(summary.results[0].outcome, Some(MarkOutcome::Created));
        assert_eq!(summary.results[1].outcome, Some(MarkOutcome::Unchanged));

        let records = ctx.ledger.list_for_event(&"e1".into()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verification_method, VerificationMethod::BatchPhoto);
    }

    #[tokio::test]
    async fn test_unregistered_identity_is_not_matched() {
        // [5, 5] is v3, enrolled but not registered for e1
        let ctx = context(faces_with(vec![vec![5.0, 5.0], vec![1.0, 1.0]])).await;
        let processor = BatchProcessor::new(ctx, 2);

        let summary = processor.process(&"e1".into(), photo(), None).await.unwrap();
        assert_eq!(summary.matches_found, 1);
        assert_eq!(summary.results[0].identity_id, None);
        assert_eq!(summary.results[1].identity_id, Some("v2".into()));
    }

    #[tokio::test]
    async fn test_empty_registration_set_is_not_an_error() {
        let mut faces = MockFaceCapability::new();
        faces
            .expect_detect_regions()
            .returning(|_| Ok(vec![FaceRegion::new(0, 0, 8, 8)]));
        faces.expect_embed().never();
        let processor = BatchProcessor::new(context(faces).await, 2);

        let summary = processor.process(&"empty".into(), photo(), None).await.unwrap();
        assert_eq!(summary.total_faces, 1);
        assert_eq!(summary.matches_found, 0);
        assert!(summary.attendance_marked.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_override() {
        // distance 0.5 from v1: confidence 50
        let ctx = context(faces_with(vec![vec![0.0, 0.5]])).await;
        let processor = BatchProcessor::new(ctx, 1);

        let strict = processor
            .process(&"e1".into(), photo(), Some(60.0))
            .await
            .unwrap();
        assert_eq!(strict.matches_found, 0);

        let lenient = processor.process(&"e1".into(), photo(), None).await.unwrap();
        assert_eq!(lenient.matches_found, 1);

        let invalid = processor
            .process(&"e1".into(), photo(), Some(f64::NAN))
            .await;
        assert!(matches!(invalid, Err(CheckinError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_event_and_capability_failure() {
        let mut faces = MockFaceCapability::new();
        faces
            .expect_detect_regions()
            .returning(|_| Ok(vec![FaceRegion::new(0, 0, 8, 8)]));
        faces
            .expect_embed()
            .returning(|_, _| Err(CheckinError::Timeout("face.embed".into())));
        let processor = BatchProcessor::new(context(faces).await, 2);

        let missing = processor.process(&"nope".into(), photo(), None).await;
        assert!(matches!(missing, Err(CheckinError::EventNotFound(_))));

        let failed = processor.process(&"e1".into(), photo(), None).await;
        assert!(matches!(failed, Err(CheckinError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_wrong_length_embedding_is_a_capability_fault() {
        let ctx = context(faces_with(vec![vec![0.0, 0.0, 0.0]])).await;
        let processor = BatchProcessor::new(ctx.clone(), 1);

        let result = processor.process(&"e1".into(), photo(), None).await;
        assert!(matches!(result, Err(CheckinError::Capability(_))));
        assert!(ctx.ledger.list_for_event(&"e1".into()).await.unwrap().is_empty());
    }
}
