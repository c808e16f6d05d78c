//! Identity enrollment handlers.

use axum::extract::{Extension, Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::encode_base64;
use crate::api::auth_helpers::ensure_self_or_admin;
use crate::api::error::ApiError;
use crate::api::form::FormFields;
use crate::api::types::{DescriptorRequest, DescriptorResponse, RegisterFaceResponse};
use crate::auth::AuthContextExt;
use crate::domain::{EnrollOutcome, IdentityId, IdentitySummary};
use crate::driver::{DescriptorEnrollment, Registration};
use crate::infra::CheckinError;
use crate::server::AppState;

fn enroll_status(outcome: EnrollOutcome) -> StatusCode {
    match outcome {
        EnrollOutcome::Created => StatusCode::CREATED,
        EnrollOutcome::Replaced => StatusCode::OK,
    }
}

/// POST /register_face - Enroll an identity from a single-face photo.
pub async fn register_face(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<RegisterFaceResponse>), ApiError> {
    let form = FormFields::read(&mut multipart).await?;
    let identity_id = form.require_text(&["identity_id", "volunteer_id", "user_id"])?;
    ensure_self_or_admin(&auth, &identity_id)?;

    let registration = Registration {
        identity_id,
        display_name: form.require_text(&["display_name", "name"])?,
        contact: form.require_text(&["contact", "email"])?,
        image: form.require_file(&["image", "file"])?,
    };
    let result = state.enrollment.register(registration).await?;

    let message = match result.outcome {
        EnrollOutcome::Created => "Face registered successfully",
        EnrollOutcome::Replaced => "Face registration replaced",
    };
    Ok((
        enroll_status(result.outcome),
        Json(RegisterFaceResponse {
            message: message.to_string(),
            preview_jpeg: encode_base64(&result.preview_jpeg),
            identity: result.identity,
            outcome: result.outcome,
            region: result.region,
        }),
    ))
}

/// POST /api/v1/faces/descriptor - Enroll a client-computed descriptor.
///
/// Without an explicit identity the caller enrolls themselves.
pub async fn upload_descriptor(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<DescriptorRequest>,
) -> Result<(StatusCode, Json<DescriptorResponse>), ApiError> {
    let identity_id = request
        .identity_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| auth.subject_id.clone());
    ensure_self_or_admin(&auth, &identity_id)?;

    let (identity, outcome) = state
        .enrollment
        .enroll_descriptor(DescriptorEnrollment {
            identity_id,
            display_name: request.display_name,
            contact: request.contact,
            descriptor: request.descriptor,
        })
        .await?;

    Ok((
        enroll_status(outcome),
        Json(DescriptorResponse { identity, outcome }),
    ))
}

/// GET /api/v1/identities/:identity_id - Identity profile without the photo.
pub async fn get_identity(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(identity_id): Path<String>,
) -> Result<Json<IdentitySummary>, ApiError> {
    ensure_self_or_admin(&auth, &identity_id)?;

    let identity_id = IdentityId::new(identity_id);
    let profile = state
        .checkin
        .identities
        .get_profile(&identity_id)
        .await?
        .ok_or_else(|| CheckinError::IdentityNotFound(identity_id.to_string()))?;

    Ok(Json(IdentitySummary::from(&profile)))
}
