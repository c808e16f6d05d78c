//! Descriptor matching, self check-in and manual marking
//!
//! These flows take a client-computed descriptor (or no face at all) instead
//! of an image, so they skip the face capability.

use serde::Serialize;
use tracing::{info, instrument};

use super::{record_outcome, validate_threshold, CheckinContext, BATCH_MIN_CONFIDENCE};
use crate::domain::{
    Embedding, EventId, IdentityId, MarkRequest, MarkResult, RegistrationGating,
    VerificationMethod,
};
use crate::infra::{CheckinError, Result};
use crate::matcher::{best_match, display_confidence, Candidate};
use crate::metrics::metric_names;

/// Confidence recorded for an administrator's manual mark.
pub const MANUAL_CONFIDENCE: f64 = 100.0;

/// Best enrolled identity for a descriptor, with its registration status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptorMatch {
    pub identity_id: IdentityId,
    pub distance: f64,
    pub confidence: f64,
    /// Whether the identity is in the event's registration set.
    pub registered: bool,
}

/// Result of a self check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub distance: f64,
    pub confidence: f64,
    /// Ledger result when the descriptor verified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<MarkResult>,
}

pub struct CheckinService {
    ctx: CheckinContext,
}

impl CheckinService {
    pub fn new(ctx: CheckinContext) -> Self {
        Self { ctx }
    }

    /// Find who a descriptor belongs to without marking anyone.
    ///
    /// Every enrolled identity is a candidate; `registered` tells the caller
    /// whether the winner may be marked for the event.
    #[instrument(skip(self, descriptor))]
    pub async fn match_descriptor(
        &self,
        event_id: &EventId,
        descriptor: Vec<f64>,
        min_confidence: Option<f64>,
    ) -> Result<Option<DescriptorMatch>> {
        let min_confidence = validate_threshold(min_confidence.unwrap_or(BATCH_MIN_CONFIDENCE))?;
        let query = self.well_formed(descriptor).await?;
        let event = self.ctx.require_event(event_id).await?;
        let candidates = self
            .ctx
            .candidates_for(&event, RegistrationGating::Open)
            .await?;

        let best = best_match(&query, &candidates, min_confidence)?;
        let metric = if best.is_some() {
            metric_names::FACES_MATCHED
        } else {
            metric_names::FACES_UNKNOWN
        };
        self.ctx.metrics.inc_counter(metric).await;

        Ok(best.map(|m| DescriptorMatch {
            registered: event.is_registered(&m.identity_id),
            identity_id: m.identity_id,
            distance: m.distance,
            confidence: display_confidence(m.confidence),
        }))
    }

    /// Compare a descriptor with the caller's own enrolled embedding and mark
    /// attendance when it verifies.
    ///
    /// Checking in twice is not an error; the second call reports the
    /// existing record.
    #[instrument(skip(self, descriptor))]
    pub async fn verify(
        &self,
        event_id: &EventId,
        identity_id: &IdentityId,
        descriptor: Vec<f64>,
        min_confidence: Option<f64>,
    ) -> Result<VerifyOutcome> {
        let min_confidence = validate_threshold(min_confidence.unwrap_or(BATCH_MIN_CONFIDENCE))?;
        let query = self.well_formed(descriptor).await?;
        let event = self.ctx.require_event(event_id).await?;
        if !event.is_registered(identity_id) {
            return Err(CheckinError::NotRegistered {
                event_id: event_id.to_string(),
                identity_id: identity_id.to_string(),
            });
        }
        let profile = self
            .ctx
            .identities
            .get_profile(identity_id)
            .await?
            .ok_or_else(|| CheckinError::IdentityNotFound(identity_id.to_string()))?;

        let own = [Candidate::new(profile.identity_id, profile.embedding)];
        let Some(found) = best_match(&query, &own, f64::NEG_INFINITY)? else {
            // distance was NaN
            return Err(CheckinError::InvalidEmbedding(
                "descriptor could not be compared".into(),
            ));
        };

        if found.confidence < min_confidence {
            info!(confidence = found.confidence, "self check-in rejected");
            self.ctx
                .metrics
                .inc_counter(metric_names::FACES_UNKNOWN)
                .await;
            return Ok(VerifyOutcome {
                verified: false,
                distance: found.distance,
                confidence: display_confidence(found.confidence),
                attendance: None,
            });
        }

        let result = self
            .ctx
            .ledger
            .mark_present(
                MarkRequest::new(
                    event_id.clone(),
                    identity_id.clone(),
                    found.confidence,
                    VerificationMethod::LiveStream,
                )
                .gating(RegistrationGating::Enforced),
            )
            .await?;
        self.ctx
            .metrics
            .inc_counter(metric_names::FACES_MATCHED)
            .await;
        record_outcome(&self.ctx.metrics, result.outcome).await;
        info!(outcome = ?result.outcome, "self check-in verified");

        Ok(VerifyOutcome {
            verified: true,
            distance: found.distance,
            confidence: display_confidence(found.confidence),
            attendance: Some(result),
        })
    }

    /// Mark an identity present without a face match.
    #[instrument(skip(self))]
    pub async fn mark_manual(
        &self,
        event_id: &EventId,
        identity_id: &IdentityId,
    ) -> Result<MarkResult> {
        self.ctx.require_event(event_id).await?;
        if self.ctx.identities.get_profile(identity_id).await?.is_none() {
            return Err(CheckinError::IdentityNotFound(identity_id.to_string()));
        }

        let result = self
            .ctx
            .ledger
            .mark_present(
                MarkRequest::new(
                    event_id.clone(),
                    identity_id.clone(),
                    MANUAL_CONFIDENCE,
                    VerificationMethod::Manual,
                )
                .gating(RegistrationGating::Open),
            )
            .await?;
        record_outcome(&self.ctx.metrics, result.outcome).await;
        Ok(result)
    }

    async fn well_formed(&self, descriptor: Vec<f64>) -> Result<Embedding> {
        let embedding = Embedding::new(descriptor);
        if embedding.is_well_formed() {
            return Ok(embedding);
        }
        self.ctx
            .metrics
            .inc_counter(metric_names::VALIDATION_ERRORS)
            .await;
        Err(CheckinError::InvalidEmbedding(
            "descriptor must be a non-empty list of finite numbers".into(),
        ))
    }
}
