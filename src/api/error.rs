//! Structured API error responses with error codes
//!
//! Every handler failure becomes `{"error": {"code", "numeric_code",
//! "message", ...}}` with the code repeated in an `x-error-code` header.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::infra::CheckinError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    /// No authentication credentials provided
    AuthRequired,
    /// Malformed or wrongly signed token
    InvalidToken,
    /// Token has expired
    TokenExpired,
    /// Insufficient permissions for this operation
    InsufficientPermissions,

    // Rate limiting errors (2xxx)
    RateLimitExceeded,

    // Validation errors (3xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Required field is missing
    MissingRequiredField,
    /// Field value is invalid
    InvalidFieldValue,
    /// Payload exceeds size limit
    PayloadTooLarge,
    /// Uploaded bytes are not a decodable image
    InvalidImage,
    NoFaceDetected,
    MultipleFacesDetected,
    /// Embedding length differs from the enrolled dimensionality
    DimensionMismatch,
    /// Embedding is empty or has non-finite values
    InvalidEmbedding,
    /// Identity is not in the event's registration set
    NotRegistered,

    // Resource errors (4xxx)
    ResourceNotFound,
    EventNotFound,
    IdentityNotFound,

    // Conflict errors (5xxx)
    /// Concurrent writers kept winning
    VersionConflict,
    /// Resource already exists
    AlreadyExists,

    // Infrastructure errors (8xxx)
    /// Database operation failed
    DatabaseError,
    /// Face service or camera unavailable
    ServiceUnavailable,
    /// Operation timed out
    Timeout,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            // Auth (1xxx)
            ErrorCode::AuthRequired => 1001,
            ErrorCode::InvalidToken => 1002,
            ErrorCode::TokenExpired => 1003,
            ErrorCode::InsufficientPermissions => 1004,

            // Rate limiting (2xxx)
            ErrorCode::RateLimitExceeded => 2001,

            // Validation (3xxx)
            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::MissingRequiredField => 3002,
            ErrorCode::InvalidFieldValue => 3003,
            ErrorCode::PayloadTooLarge => 3004,
            ErrorCode::InvalidImage => 3005,
            ErrorCode::NoFaceDetected => 3006,
            ErrorCode::MultipleFacesDetected => 3007,
            ErrorCode::DimensionMismatch => 3008,
            ErrorCode::InvalidEmbedding => 3009,
            ErrorCode::NotRegistered => 3010,

            // Resource (4xxx)
            ErrorCode::ResourceNotFound => 4001,
            ErrorCode::EventNotFound => 4002,
            ErrorCode::IdentityNotFound => 4003,

            // Conflict (5xxx)
            ErrorCode::VersionConflict => 5001,
            ErrorCode::AlreadyExists => 5002,

            // Infrastructure (8xxx)
            ErrorCode::DatabaseError => 8001,
            ErrorCode::ServiceUnavailable => 8002,
            ErrorCode::Timeout => 8003,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,

            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::InvalidRequestBody
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFieldValue
            | ErrorCode::InvalidImage
            | ErrorCode::NoFaceDetected
            | ErrorCode::MultipleFacesDetected
            | ErrorCode::DimensionMismatch
            | ErrorCode::InvalidEmbedding
            | ErrorCode::NotRegistered => StatusCode::BAD_REQUEST,

            ErrorCode::ResourceNotFound
            | ErrorCode::EventNotFound
            | ErrorCode::IdentityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::VersionConflict | ErrorCode::AlreadyExists => StatusCode::CONFLICT,

            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::InvalidImage => "INVALID_IMAGE",
            ErrorCode::NoFaceDetected => "NO_FACE_DETECTED",
            ErrorCode::MultipleFacesDetected => "MULTIPLE_FACES_DETECTED",
            ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorCode::InvalidEmbedding => "INVALID_EMBEDDING",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::EventNotFound => "EVENT_NOT_FOUND",
            ErrorCode::IdentityNotFound => "IDENTITY_NOT_FOUND",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds to wait before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                retry_after: None,
                resource_id: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from CheckinError and AuthError
// ============================================================================

impl From<CheckinError> for ApiError {
    fn from(err: CheckinError) -> Self {
        match err {
            CheckinError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::new(ErrorCode::DatabaseError, "Database error")
            }
            CheckinError::Serialization(e) => {
                tracing::error!(error = %e, "stored document unreadable");
                ApiError::new(ErrorCode::InternalError, "Stored document is unreadable")
            }
            CheckinError::EventNotFound(id) => {
                ApiError::new(ErrorCode::EventNotFound, format!("Event not found: {}", id))
                    .with_resource_id(id)
            }
            CheckinError::IdentityNotFound(id) => ApiError::new(
                ErrorCode::IdentityNotFound,
                format!("Identity not found: {}", id),
            )
            .with_resource_id(id),
            CheckinError::NotRegistered {
                event_id,
                identity_id,
            } => ApiError::new(
                ErrorCode::NotRegistered,
                format!(
                    "Identity {} is not registered for event {}",
                    identity_id, event_id
                ),
            )
            .with_details(serde_json::json!({
                "event_id": event_id,
                "identity_id": identity_id
            })),
            CheckinError::AlreadyExists(id) => {
                ApiError::new(ErrorCode::AlreadyExists, format!("Already exists: {}", id))
                    .with_resource_id(id)
            }
            CheckinError::DimensionMismatch { expected, actual } => ApiError::new(
                ErrorCode::DimensionMismatch,
                format!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    expected, actual
                ),
            )
            .with_details(serde_json::json!({
                "expected": expected,
                "actual": actual
            })),
            CheckinError::InvalidEmbedding(msg) => {
                ApiError::new(ErrorCode::InvalidEmbedding, msg)
            }
            CheckinError::NoFaceDetected => {
                ApiError::new(ErrorCode::NoFaceDetected, "No face detected in the image")
            }
            CheckinError::MultipleFacesDetected(count) => ApiError::new(
                ErrorCode::MultipleFacesDetected,
                format!("Expected exactly one face, found {}", count),
            )
            .with_details(serde_json::json!({ "faces": count })),
            CheckinError::InvalidImage(msg) => {
                ApiError::new(ErrorCode::InvalidImage, format!("Invalid image: {}", msg))
            }
            CheckinError::Validation(msg) => ApiError::new(ErrorCode::InvalidFieldValue, msg),
            CheckinError::Capability(msg) => {
                tracing::warn!(error = %msg, "face capability failed");
                ApiError::new(
                    ErrorCode::ServiceUnavailable,
                    "Face service is unavailable",
                )
                .with_retry_after(5)
            }
            CheckinError::Timeout(what) => {
                ApiError::new(ErrorCode::Timeout, format!("Timed out: {}", what))
                    .with_retry_after(1)
            }
            CheckinError::VersionConflict { collection, id } => ApiError::new(
                ErrorCode::VersionConflict,
                "Too many concurrent updates, retry the request",
            )
            .with_details(serde_json::json!({
                "collection": collection,
                "id": id
            }))
            .with_retry_after(1),
            CheckinError::Configuration(msg) => {
                tracing::error!(error = %msg, "configuration error");
                ApiError::new(ErrorCode::InternalError, "Service is misconfigured")
            }
            CheckinError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ApiError::new(ErrorCode::InternalError, "Internal error")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth => ApiError::new(
                ErrorCode::AuthRequired,
                "Missing authentication credentials",
            ),
            AuthError::InvalidJwt(msg) => {
                ApiError::new(ErrorCode::InvalidToken, format!("Invalid token: {}", msg))
            }
            AuthError::TokenExpired => ApiError::new(ErrorCode::TokenExpired, "Token expired"),
            AuthError::InsufficientPermissions => forbidden("Insufficient permissions"),
            AuthError::RateLimited => rate_limited(60),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, message.into())
        .with_details(serde_json::json!({ "field": field }))
}

/// A required field was absent or blank
pub fn missing_field(field: &str) -> ApiError {
    ApiError::new(
        ErrorCode::MissingRequiredField,
        format!("Missing required field: {}", field),
    )
    .with_details(serde_json::json!({ "field": field }))
}

pub fn rate_limited(retry_after_seconds: u64) -> ApiError {
    ApiError::new(ErrorCode::RateLimitExceeded, "Rate limit exceeded")
        .with_retry_after(retry_after_seconds)
}

pub fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InsufficientPermissions, message.into())
}

// ============================================================================
// Tests
// ============================================================================
