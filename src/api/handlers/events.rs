//! Event and registration handlers.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::auth_helpers::ensure_admin;
use crate::api::error::{validation_error, ApiError};
use crate::api::types::{CreateEventRequest, EventListResponse, RegisterIdentitiesRequest};
use crate::auth::AuthContextExt;
use crate::domain::{Event, EventId, IdentityId};
use crate::infra::CheckinError;
use crate::server::AppState;

/// GET /api/v1/events - List events.
///
/// Volunteers only see events they are registered for.
pub async fn list_events(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
) -> Result<Json<EventListResponse>, ApiError> {
    let events = if auth.is_admin() {
        state.checkin.events.list_events().await?
    } else {
        state
            .checkin
            .events
            .events_for_identity(&IdentityId::new(auth.subject_id))
            .await?
    };
    Ok(Json(EventListResponse {
        count: events.len(),
        events,
    }))
}

/// POST /api/v1/events - Create an event.
pub async fn create_event(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Json(request): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    ensure_admin(&auth)?;

    let event_id = match request.event_id {
        Some(id) if id.trim().is_empty() => {
            return Err(validation_error("event_id", "event_id must not be blank"))
        }
        Some(id) => EventId::new(id.trim()),
        None => EventId::generate(),
    };
    let event = Event::new(event_id, request.title).with_registrations(
        request
            .registered_identity_ids
            .into_iter()
            .map(IdentityId::new),
    );

    let created = state.checkin.events.create_event(event).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/events/:event_id - Get one event.
pub async fn get_event(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let event = state.checkin.require_event(&EventId::new(event_id)).await?;
    if !auth.is_admin() && !event.is_registered(&IdentityId::new(auth.subject_id)) {
        // Hide events the caller has no part in.
        return Err(CheckinError::EventNotFound(event.event_id.to_string()).into());
    }
    Ok(Json(event))
}

/// POST /api/v1/events/:event_id/registrations - Register identities for an event.
pub async fn register_identities(
    State(state): State<AppState>,
    Extension(AuthContextExt(auth)): Extension<AuthContextExt>,
    Path(event_id): Path<String>,
    Json(request): Json<RegisterIdentitiesRequest>,
) -> Result<Json<Event>, ApiError> {
    // Volunteers may sign themselves up; anything else needs an administrator.
    let self_signup = matches!(request.identity_ids.as_slice(), [only] if *only == auth.subject_id);
    if !self_signup {
        ensure_admin(&auth)?;
    }
    if request.identity_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(validation_error(
            "identity_ids",
            "identity ids must not be blank",
        ));
    }

    let event = state
        .checkin
        .events
        .register_identities(
            &EventId::new(event_id),
            request.identity_ids.into_iter().map(IdentityId::new).collect(),
        )
        .await?;
    Ok(Json(event))
}
