//! Health, readiness and metrics handlers
//!
//! None of these require authentication.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::server::AppState;
use crate::telemetry::SERVICE_NAME;

/// Response for the basic health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub store: ComponentStatus,
    pub camera_configured: bool,
    pub active_streams: u64,
    pub shutting_down: bool,
}

/// Liveness probe. Performs no checks.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: HealthStatus::Healthy,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Readiness probe. Pings the document store and reports shutdown state.
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let start = Instant::now();
    let store = match state.store.ping().await {
        Ok(()) => ComponentStatus {
            name: "document_store".to_string(),
            status: HealthStatus::Healthy,
            message: None,
            response_time_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => ComponentStatus {
            name: "document_store".to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(e.to_string()),
            response_time_ms: None,
        },
    };

    let shutting_down = state.shutdown.is_shutdown();
    let status = if store.status == HealthStatus::Unhealthy || shutting_down {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    };
    let code = if status == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            store,
            camera_configured: state.camera.is_some(),
            active_streams: state.shutdown.streams().active_count(),
            shutting_down,
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub format: Option<String>,
}

/// Metrics as JSON, or Prometheus text with `?format=prometheus`.
pub async fn metrics(State(state): State<AppState>, Query(query): Query<MetricsQuery>) -> Response {
    let registry = &state.checkin.metrics;
    match query.format.as_deref() {
        Some("prometheus") => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            registry.to_prometheus().await,
        )
            .into_response(),
        _ => Json(registry.to_json().await).into_response(),
    }
}
