//! Identity enrollment
//!
//! A registration photo must contain exactly one face. Its embedding becomes
//! the identity's single stored embedding; enrolling the same id again
//! replaces the whole record.

use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument};

use super::CheckinContext;
use crate::domain::{Embedding, EnrollOutcome, Identity, IdentityId, IdentitySummary};
use crate::face::{annotate_jpeg, single_region, FaceImage, FaceRegion, FaceStatus};
use crate::infra::{CheckinError, Result};
use crate::metrics::{metric_names, timed};

/// Photo-based registration input.
#[derive(Debug, Clone)]
pub struct Registration {
    pub identity_id: String,
    pub display_name: String,
    pub contact: String,
    pub image: Bytes,
}

/// Client-computed descriptor enrollment.
///
/// Missing name or contact are carried over from an existing record.
#[derive(Debug, Clone)]
pub struct DescriptorEnrollment {
    pub identity_id: String,
    pub display_name: Option<String>,
    pub contact: Option<String>,
    pub descriptor: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResult {
    pub identity: IdentitySummary,
    pub outcome: EnrollOutcome,
    pub region: FaceRegion,
    /// JPEG of the registration photo with the detected face boxed.
    #[serde(skip)]
    pub preview_jpeg: Vec<u8>,
}

pub struct EnrollmentService {
    ctx: CheckinContext,
}

impl EnrollmentService {
    pub fn new(ctx: CheckinContext) -> Self {
        Self { ctx }
    }

    /// Register an identity from a single-face photo.
    #[instrument(skip_all, fields(identity_id = %registration.identity_id))]
    pub async fn register(&self, registration: Registration) -> Result<RegistrationResult> {
        let start = Instant::now();
        let identity_id = required("identity_id", &registration.identity_id)?;
        let display_name = required("display_name", &registration.display_name)?;
        let contact = required("contact", &registration.contact)?;

        let image = FaceImage::decode_blocking(registration.image.clone()).await?;
        let region = single_region(self.ctx.faces.detect_regions(&image).await?)?;
        let expected = self.ctx.identities.dimension().await?;
        let embedding = self.ctx.embed_face(&image, region, expected).await?;

        let identity = Identity::new(
            IdentityId::new(identity_id),
            display_name,
            contact,
            embedding,
            registration.image.to_vec(),
        );
        let (profile, _) = identity.clone().into_parts();
        let outcome = self.ctx.identities.enroll(identity).await?;

        let preview_jpeg = tokio::task::spawn_blocking(move || {
            annotate_jpeg(image.pixels(), &[(region, FaceStatus::Marked)])
        })
        .await
        .map_err(|e| CheckinError::Internal(format!("preview task failed: {e}")))??;

        self.ctx.metrics.inc_counter(metric_names::ENROLLMENTS).await;
        self.ctx
            .metrics
            .observe_histogram(metric_names::ENROLL_LATENCY, start.elapsed().as_secs_f64())
            .await;
        info!(?outcome, dimension = profile.embedding.dimension(), "identity enrolled");

        Ok(RegistrationResult {
            identity: IdentitySummary::from(&profile),
            outcome,
            region,
            preview_jpeg,
        })
    }

    /// Enroll a descriptor computed on the client.
    #[instrument(skip_all, fields(identity_id = %enrollment.identity_id))]
    pub async fn enroll_descriptor(
        &self,
        enrollment: DescriptorEnrollment,
    ) -> Result<(IdentitySummary, EnrollOutcome)> {
        let identity_id = IdentityId::new(required("identity_id", &enrollment.identity_id)?);
        let embedding = Embedding::new(enrollment.descriptor);
        if !embedding.is_well_formed() {
            return Err(CheckinError::InvalidEmbedding(
                "descriptor must be a non-empty list of finite numbers".into(),
            ));
        }

        let existing = self.ctx.identities.get_profile(&identity_id).await?;
        let display_name = enrollment
            .display_name
            .filter(|s| !s.trim().is_empty())
            .or_else(|| existing.as_ref().map(|p| p.display_name.clone()))
            .ok_or_else(|| CheckinError::Validation("display_name is required".into()))?;
        let contact = enrollment
            .contact
            .filter(|s| !s.trim().is_empty())
            .or_else(|| existing.as_ref().map(|p| p.contact.clone()))
            .unwrap_or_default();

        let identity = Identity::new(identity_id, display_name, contact, embedding, Vec::new());
        let (profile, _) = identity.clone().into_parts();
        let outcome = timed(
            &self.ctx.metrics,
            metric_names::ENROLL_LATENCY,
            self.ctx.identities.enroll(identity),
        )
        .await?;

        self.ctx.metrics.inc_counter(metric_names::ENROLLMENTS).await;
        info!(?outcome, "descriptor enrolled");
        Ok((IdentitySummary::from(&profile), outcome))
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CheckinError::Validation(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}
