//! REST routes for the check-in service.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{attendance, events, faces, health, live};
use crate::server::AppState;

/// Build the `/api` router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/events",
            get(events::list_events).post(events::create_event),
        )
        .route("/v1/events/:event_id", get(events::get_event))
        .route(
            "/v1/events/:event_id/registrations",
            post(events::register_identities),
        )
        .route("/v1/identities/:identity_id", get(faces::get_identity))
        .route(
            "/v1/identities/:identity_id/attendance",
            get(attendance::identity_attendance),
        )
        .route("/v1/faces/descriptor", post(faces::upload_descriptor))
        .route("/v1/attendance/match", post(attendance::match_descriptor))
        .route("/v1/attendance/verify", post(attendance::verify))
        .route("/v1/attendance/manual", post(attendance::manual_mark))
        .route("/v1/attendance/frame", post(attendance::process_frame))
}

/// Top-level upload and stream routes used by the web dashboard.
pub fn dashboard_router() -> Router<AppState> {
    Router::new()
        .route("/register_face", post(faces::register_face))
        .route("/live_attendance", get(live::live_attendance))
        .route("/bulk-process", post(attendance::bulk_process))
        .route("/attendance_logs", get(attendance::attendance_logs))
}

/// Unauthenticated probes and metrics.
pub fn ops_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
}
