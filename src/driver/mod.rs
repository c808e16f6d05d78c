//! Orchestration flows over the matcher and the ledger
//!
//! - [`registration`]: enroll an identity from a photo or a client descriptor
//! - [`live`]: single-face live camera stream with annotated frames
//! - [`batch`]: group-photo attendance
//! - [`checkin`]: descriptor matching, self check-in and manual marks
//! - [`camera`]: frame sources for the live stream

pub mod batch;
pub mod camera;
pub mod checkin;
pub mod live;
pub mod registration;

pub use batch::{BatchFaceResult, BatchProcessor, BatchSummary};
pub use camera::{CameraFactory, FrameSource, SnapshotCamera, SnapshotCameraFactory};
pub use checkin::{CheckinService, DescriptorMatch, VerifyOutcome, MANUAL_CONFIDENCE};
pub use live::{
    spawn_live_stream, FaceReport, FrameReport, LiveSession, LiveStreamConfig, FRAME_BOUNDARY,
};
pub use registration::{DescriptorEnrollment, EnrollmentService, Registration, RegistrationResult};

use std::sync::Arc;

use crate::domain::{Embedding, Event, EventId, MarkOutcome, RegistrationGating};
use crate::face::{FaceCapability, FaceImage, FaceRegion};
use crate::infra::{AttendanceLedger, CheckinError, EmbeddingStore, EventRegistry, Result};
use crate::matcher::Candidate;
use crate::metrics::{metric_names, MetricsRegistry};

/// Minimum confidence for a live-stream match.
pub const LIVE_MIN_CONFIDENCE: f64 = 90.0;

/// Default minimum confidence for group photos and descriptor checks
/// (a Euclidean distance of 0.6).
pub const BATCH_MIN_CONFIDENCE: f64 = 40.0;

/// Collaborators shared by every driver.
#[derive(Clone)]
pub struct CheckinContext {
    pub faces: Arc<dyn FaceCapability>,
    pub identities: Arc<dyn EmbeddingStore>,
    pub events: Arc<dyn EventRegistry>,
    pub ledger: Arc<dyn AttendanceLedger>,
    pub metrics: Arc<MetricsRegistry>,
}

impl CheckinContext {
    /// Load an event or fail with `EventNotFound`.
    pub async fn require_event(&self, event_id: &EventId) -> Result<Event> {
        self.events
            .get_event(event_id)
            .await?
            .ok_or_else(|| CheckinError::EventNotFound(event_id.to_string()))
    }

    /// Identities eligible for matching at `event` under `gating`.
    pub async fn candidates_for(
        &self,
        event: &Event,
        gating: RegistrationGating,
    ) -> Result<Vec<Candidate>> {
        let restrict_to = match gating {
            RegistrationGating::Enforced => Some(event.registered_identity_ids.clone()),
            RegistrationGating::Open => None,
        };
        self.identities.candidates(restrict_to).await
    }

    /// Embed one face. A vector whose length differs from `expected` is a
    /// capability fault, not a client error.
    pub async fn embed_face(
        &self,
        image: &FaceImage,
        region: FaceRegion,
        expected: Option<usize>,
    ) -> Result<Embedding> {
        let embedding = self.faces.embed(image, region).await?;
        match expected {
            Some(expected) if embedding.dimension() != expected => {
                Err(CheckinError::Capability(format!(
                    "face capability returned a {}-dimension embedding, expected {expected}",
                    embedding.dimension()
                )))
            }
            _ => Ok(embedding),
        }
    }
}

/// Reject thresholds that cannot be compared against.
pub(crate) fn validate_threshold(min_confidence: f64) -> Result<f64> {
    if min_confidence.is_finite() {
        Ok(min_confidence)
    } else {
        Err(CheckinError::Validation(
            "min_confidence must be a finite number".into(),
        ))
    }
}

/// Count a ledger outcome.
pub(crate) async fn record_outcome(metrics: &MetricsRegistry, outcome: MarkOutcome) {
    let name = match outcome {
        MarkOutcome::Created => metric_names::ATTENDANCE_CREATED,
        MarkOutcome::ConfidenceRaised => metric_names::ATTENDANCE_RAISED,
        MarkOutcome::Unchanged => metric_names::ATTENDANCE_UNCHANGED,
    };
    metrics.inc_counter(name).await;
}
