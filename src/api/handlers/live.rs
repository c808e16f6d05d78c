//! Live camera stream handler.

use axum::body::Body;
use axum::extract::{Extension, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use tracing::info;

use crate::api::auth_helpers::ensure_admin;
use crate::api::error::{ApiError, ErrorCode};
use crate::api::types::LiveQuery;
use crate::auth::AuthContextExt;
use crate::domain::EventId;
use crate::driver::{spawn_live_stream, LiveSession, FRAME_BOUNDARY};
use crate::server::AppState;

/// GET /live_attendance - Annotated camera frames as `multipart/x-mixed-replace`.
///
/// The stream runs until the client disconnects or the server shuts down.
pub async fn live_attendance(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Query(query): Query<LiveQuery>,
) -> Result<Response, ApiError> {
    ensure_admin(&auth)?;

    let camera = state.camera.clone().ok_or_else(|| {
        ApiError::new(ErrorCode::ServiceUnavailable, "No camera is configured")
    })?;
    if state.shutdown.is_shutdown() {
        return Err(ApiError::new(
            ErrorCode::ServiceUnavailable,
            "Server is shutting down",
        ));
    }

    let event_id = EventId::new(query.event_id);
    let session = LiveSession::open(state.checkin.clone(), event_id.clone(), state.live.gating)
        .await?
        .with_min_confidence(state.live.min_confidence)?;
    let source = camera.open()?;

    info!(%event_id, subject = %auth.subject_id, "opening live stream");
    let stream = spawn_live_stream(
        session,
        source,
        state.shutdown.signal(),
        state.shutdown.streams(),
        state.live.stream.clone(),
    );

    let content_type = format!("multipart/x-mixed-replace; boundary={FRAME_BOUNDARY}");
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}
