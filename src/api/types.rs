//! Shared request and response types for REST API handlers.

use serde::{Deserialize, Serialize};

use crate::domain::{AttendanceRecord, EnrollOutcome, Event, IdentitySummary};
use crate::driver::{BatchSummary, DescriptorMatch, FrameReport};
use crate::face::FaceRegion;

// ============================================================================
// Registration types
// ============================================================================

/// Response for `POST /register_face`.
#[derive(Debug, Serialize)]
pub struct RegisterFaceResponse {
    pub message: String,
    pub identity: IdentitySummary,
    pub outcome: EnrollOutcome,
    pub region: FaceRegion,
    /// Base64 JPEG with the detected face boxed.
    pub preview_jpeg: String,
}

/// Request body for `POST /api/v1/faces/descriptor`.
#[derive(Debug, Deserialize)]
pub struct DescriptorRequest {
    #[serde(alias = "user_id", alias = "volunteer_id")]
    pub identity_id: Option<String>,
    #[serde(alias = "name")]
    pub display_name: Option<String>,
    #[serde(alias = "email")]
    pub contact: Option<String>,
    #[serde(alias = "faceDescriptor", alias = "face_descriptor")]
    pub descriptor: Vec<f64>,
}

#[derive(Debug, Serialize)]
pub struct DescriptorResponse {
    pub identity: IdentitySummary,
    pub outcome: EnrollOutcome,
}

// ============================================================================
// Attendance types
// ============================================================================

/// Request body for `POST /api/v1/attendance/match`.
#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    #[serde(alias = "eventId")]
    pub event_id: String,
    #[serde(alias = "faceDescriptor", alias = "face_descriptor")]
    pub descriptor: Vec<f64>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best: Option<DescriptorMatch>,
}

/// Request body for `POST /api/v1/attendance/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(alias = "eventId")]
    pub event_id: String,
    #[serde(alias = "faceDescriptor", alias = "face_descriptor")]
    pub descriptor: Vec<f64>,
    pub min_confidence: Option<f64>,
}

/// Request body for `POST /api/v1/attendance/manual`.
#[derive(Debug, Deserialize)]
pub struct ManualMarkRequest {
    #[serde(alias = "eventId")]
    pub event_id: String,
    #[serde(alias = "user_id", alias = "volunteer_id")]
    pub identity_id: String,
}

/// Query for `GET /attendance_logs`.
#[derive(Debug, Deserialize)]
pub struct AttendanceLogsQuery {
    pub event_id: String,
    #[serde(default)]
    pub include_photos: bool,
}

/// One row of the attendance report.
#[derive(Debug, Serialize)]
pub struct AttendanceLogEntry {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub display_name: Option<String>,
    pub contact: Option<String>,
    /// Base64 reference photo, only when requested and stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AttendanceLogsResponse {
    pub event_id: String,
    pub count: usize,
    pub attendance: Vec<AttendanceLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct IdentityAttendanceResponse {
    pub identity_id: String,
    pub count: usize,
    pub attendance: Vec<AttendanceRecord>,
}

/// Response for `POST /bulk-process`.
#[derive(Debug, Serialize)]
pub struct BulkProcessResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: BatchSummary,
}

// ============================================================================
// Live stream types
// ============================================================================

/// Query for `GET /live_attendance`.
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub event_id: String,
}

/// Response for `POST /api/v1/attendance/frame`.
#[derive(Debug, Serialize)]
pub struct FrameResponse {
    #[serde(flatten)]
    pub report: FrameReport,
    /// Base64 annotated JPEG.
    pub annotated_jpeg: String,
}

// ============================================================================
// Event types
// ============================================================================

/// Request body for `POST /api/v1/events`.
#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    /// Generated when absent.
    #[serde(alias = "eventId")]
    pub event_id: Option<String>,
    pub title: Option<String>,
    #[serde(default, alias = "registered_volunteers")]
    pub registered_identity_ids: Vec<String>,
}

/// Request body for `POST /api/v1/events/:event_id/registrations`.
#[derive(Debug, Deserialize)]
pub struct RegisterIdentitiesRequest {
    #[serde(alias = "volunteer_ids")]
    pub identity_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub events: Vec<Event>,
    pub count: usize,
}
