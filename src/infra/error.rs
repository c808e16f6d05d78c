//! Error types for the check-in service

use thiserror::Error;

/// Errors that can occur in the check-in core and its infrastructure
#[derive(Error, Debug)]
pub enum CheckinError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored document could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event not found
    #[error("event not found: {0}")]
    EventNotFound(String),

    /// Identity not found
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Identity is not registered for the event
    #[error("identity {identity_id} is not registered for event {event_id}")]
    NotRegistered {
        event_id: String,
        identity_id: String,
    },

    /// Resource already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Embedding length differs from the deployment's dimensionality
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedding is empty or contains non-finite values
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    /// No face in an image that needs one
    #[error("no face detected")]
    NoFaceDetected,

    /// More than one face where exactly one is required
    #[error("expected exactly one face, found {0}")]
    MultipleFacesDetected(usize),

    /// Image bytes could not be decoded
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Request validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Face detection/embedding capability failed
    #[error("face capability error: {0}")]
    Capability(String),

    /// An operation exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),

    /// Optimistic write kept losing to concurrent writers
    #[error("version conflict on {collection}/{id}")]
    VersionConflict { collection: String, id: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CheckinError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckinError::Timeout(_)
                | CheckinError::Capability(_)
                | CheckinError::VersionConflict { .. }
                | CheckinError::Database(sqlx::Error::PoolTimedOut)
                | CheckinError::Database(sqlx::Error::Io(_))
        )
    }
}

/// Result type for check-in operations
pub type Result<T> = std::result::Result<T, CheckinError>;
