//! Attendance handlers: group photos, descriptor check-in and reports.

use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::Json;
use tracing::info;

use super::encode_base64;
use crate::api::auth_helpers::{ensure_admin, ensure_self_or_admin};
use crate::api::error::{validation_error, ApiError};
use crate::api::form::FormFields;
use crate::api::types::{
    AttendanceLogEntry, AttendanceLogsQuery, AttendanceLogsResponse, BulkProcessResponse,
    FrameResponse, IdentityAttendanceResponse, ManualMarkRequest, MatchRequest, MatchResponse,
    VerifyRequest,
};
use crate::auth::AuthContextExt;
use crate::domain::{EventId, IdentityId, MarkResult};
use crate::driver::{LiveSession, VerifyOutcome};
use crate::matcher::confidence_from_distance;
use crate::server::AppState;

/// POST /bulk-process - Mark everyone recognised in a group photo.
pub async fn bulk_process(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    mut multipart: Multipart,
) -> Result<Json<BulkProcessResponse>, ApiError> {
    ensure_admin(&auth)?;

    let form = FormFields::read(&mut multipart).await?;
    let event_id = EventId::new(form.require_text(&["event_id", "eventId"])?);
    let photo = form.require_file(&["photo", "image", "file"])?;
    let min_confidence = match (
        form.number(&["min_confidence", "minConfidence"])?,
        form.number(&["threshold"])?,
    ) {
        (Some(_), Some(_)) => {
            return Err(validation_error(
                "threshold",
                "send either threshold or min_confidence, not both",
            ))
        }
        // A distance threshold, as older clients send it.
        (None, Some(distance)) => Some(confidence_from_distance(distance)),
        (confidence, None) => confidence,
    };

    let summary = state.batch.process(&event_id, photo, min_confidence).await?;
    let message = format!(
        "Processed {} faces, {} matched, {} marked",
        summary.total_faces,
        summary.matches_found,
        summary.attendance_marked.len()
    );
    Ok(Json(BulkProcessResponse { message, summary }))
}

/// GET /attendance_logs - Attendance for one event with identity details.
pub async fn attendance_logs(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Query(query): Query<AttendanceLogsQuery>,
) -> Result<Json<AttendanceLogsResponse>, ApiError> {
    ensure_admin(&auth)?;

    let event_id = EventId::new(query.event_id);
    state.checkin.require_event(&event_id).await?;
    let records = state.checkin.ledger.list_for_event(&event_id).await?;

    let mut attendance = Vec::with_capacity(records.len());
    for record in records {
        let profile = state
            .checkin
            .identities
            .get_profile(&record.identity_id)
            .await?;
        let photo = match (&profile, query.include_photos) {
            (Some(p), true) if p.has_reference_image => state
                .checkin
                .identities
                .reference_image(&record.identity_id)
                .await?
                .map(|bytes| encode_base64(&bytes)),
            _ => None,
        };
        attendance.push(AttendanceLogEntry {
            display_name: profile.as_ref().map(|p| p.display_name.clone()),
            contact: profile.map(|p| p.contact),
            photo,
            record,
        });
    }

    Ok(Json(AttendanceLogsResponse {
        event_id: event_id.to_string(),
        count: attendance.len(),
        attendance,
    }))
}

/// GET /api/v1/identities/:identity_id/attendance - History for one identity.
pub async fn identity_attendance(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(identity_id): Path<String>,
) -> Result<Json<IdentityAttendanceResponse>, ApiError> {
    ensure_self_or_admin(&auth, &identity_id)?;

    let records = state
        .checkin
        .ledger
        .list_for_identity(&IdentityId::new(identity_id.clone()))
        .await?;
    Ok(Json(IdentityAttendanceResponse {
        identity_id,
        count: records.len(),
        attendance: records,
    }))
}

/// POST /api/v1/attendance/match - Who does this descriptor belong to?
pub async fn match_descriptor(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<MatchRequest>,
) -> Result<Json<MatchResponse>, ApiError> {
    ensure_admin(&auth)?;

    let best = state
        .attendance
        .match_descriptor(
            &EventId::new(request.event_id),
            request.descriptor,
            request.min_confidence,
        )
        .await?;
    Ok(Json(MatchResponse {
        match_found: best.is_some(),
        best,
    }))
}

/// POST /api/v1/attendance/verify - Self check-in with the caller's descriptor.
pub async fn verify(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyOutcome>, ApiError> {
    let outcome = state
        .attendance
        .verify(
            &EventId::new(request.event_id),
            &IdentityId::new(auth.subject_id),
            request.descriptor,
            request.min_confidence,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/attendance/manual - Administrator marks an identity present.
pub async fn manual_mark(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<ManualMarkRequest>,
) -> Result<Json<MarkResult>, ApiError> {
    ensure_admin(&auth)?;

    let result = state
        .attendance
        .mark_manual(
            &EventId::new(request.event_id),
            &IdentityId::new(request.identity_id),
        )
        .await?;
    info!(
        marked_by = %auth.subject_id,
        identity_id = %result.record.identity_id,
        outcome = ?result.outcome,
        "manual attendance mark"
    );
    Ok(Json(result))
}

/// POST /api/v1/attendance/frame - Run one uploaded frame through the live path.
///
/// For clients that capture frames themselves instead of watching the
/// server's camera.
pub async fn process_frame(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    mut multipart: Multipart,
) -> Result<Json<FrameResponse>, ApiError> {
    ensure_admin(&auth)?;

    let form = FormFields::read(&mut multipart).await?;
    let event_id = EventId::new(form.require_text(&["event_id", "eventId"])?);
    let frame = form.require_file(&["frame", "image"])?;

    let session = LiveSession::open(state.checkin.clone(), event_id, state.live.gating)
        .await?
        .with_min_confidence(state.live.min_confidence)?;
    let report = session.process_frame(frame).await?;

    Ok(Json(FrameResponse {
        annotated_jpeg: encode_base64(&report.jpeg),
        report,
    }))
}
