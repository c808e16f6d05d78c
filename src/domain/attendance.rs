//! Attendance records and the `mark_present` request/response types.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use super::types::{EventId, IdentityId};

/// How an attendance mark was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    /// Single-face match from the live camera path or a self check-in.
    LiveStream,
    /// One of several faces matched in an uploaded group photo.
    BatchPhoto,
    /// Marked by an administrator without a face match.
    Manual,
}

impl VerificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMethod::LiveStream => "live_stream",
            VerificationMethod::BatchPhoto => "batch_photo",
            VerificationMethod::Manual => "manual",
        }
    }
}

/// Whether `mark_present` requires the identity to be registered for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationGating {
    #[default]
    Enforced,
    Open,
}

/// The durable fact that an identity was matched at an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub event_id: EventId,
    pub identity_id: IdentityId,
    /// High-water mark; never decreases.
    pub confidence_score: f64,
    pub first_marked_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub verification_method: VerificationMethod,
}

impl AttendanceRecord {
    /// Record for the first successful mark of a pair.
    pub fn first(request: &MarkRequest) -> Self {
        Self {
            event_id: request.event_id.clone(),
            identity_id: request.identity_id.clone(),
            confidence_score: request.confidence,
            first_marked_at: request.at_time,
            last_updated_at: request.at_time,
            verification_method: request.method,
        }
    }

    /// Copy of this record with the confidence raised to the request's value.
    pub fn raised(&self, request: &MarkRequest) -> Self {
        Self {
            confidence_score: request.confidence,
            last_updated_at: request.at_time,
            ..self.clone()
        }
    }
}

/// Attendance document as it may appear in the store.
///
/// The first prototype wrote `{event_id, volunteer_id, timestamp,
/// confidence_score}`; those documents are read as [`AttendanceDocument::Legacy`]
/// and rewritten in the current shape on their next update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttendanceDocument {
    Current(AttendanceRecord),
    Legacy(LegacyAttendance),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyAttendance {
    pub event_id: EventId,
    pub volunteer_id: IdentityId,
    /// RFC 3339, or a naive ISO time without offset read as UTC.
    #[serde(deserialize_with = "lenient_utc")]
    pub timestamp: DateTime<Utc>,
    pub confidence_score: f64,
    #[serde(default)]
    pub verification_method: Option<VerificationMethod>,
}

fn lenient_utc<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
}

impl AttendanceDocument {
    pub fn into_record(self) -> AttendanceRecord {
        match self {
            AttendanceDocument::Current(record) => record,
            AttendanceDocument::Legacy(legacy) => AttendanceRecord {
                event_id: legacy.event_id,
                identity_id: legacy.volunteer_id,
                confidence_score: legacy.confidence_score,
                first_marked_at: legacy.timestamp,
                last_updated_at: legacy.timestamp,
                verification_method: legacy
                    .verification_method
                    .unwrap_or(VerificationMethod::LiveStream),
            },
        }
    }
}

/// Input to the ledger's `mark_present` transition.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRequest {
    pub event_id: EventId,
    pub identity_id: IdentityId,
    pub confidence: f64,
    pub method: VerificationMethod,
    pub at_time: DateTime<Utc>,
    pub gating: RegistrationGating,
}

impl MarkRequest {
    pub fn new(
        event_id: EventId,
        identity_id: IdentityId,
        confidence: f64,
        method: VerificationMethod,
    ) -> Self {
        Self {
            event_id,
            identity_id,
            confidence,
            method,
            at_time: Utc::now(),
            gating: RegistrationGating::Enforced,
        }
    }

    pub fn at(mut self, at_time: DateTime<Utc>) -> Self {
        self.at_time = at_time;
        self
    }

    pub fn gating(mut self, gating: RegistrationGating) -> Self {
        self.gating = gating;
        self
    }
}

/// Result of one `mark_present` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkOutcome {
    Created,
    ConfidenceRaised,
    Unchanged,
}

impl MarkOutcome {
    /// True when the call wrote to the ledger.
    pub fn is_write(&self) -> bool {
        !matches!(self, MarkOutcome::Unchanged)
    }
}

/// Outcome plus the record as it stands after the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkResult {
    pub outcome: MarkOutcome,
    pub record: AttendanceRecord,
}

/// Deterministic document id for an (event, identity) pair.
///
/// Length-prefixing keeps `("a:b", "c")` and `("a", "b:c")` apart.
pub fn attendance_document_id(event_id: &EventId, identity_id: &IdentityId) -> String {
    let mut hasher = Sha256::new();
    hasher.update((event_id.as_str().len() as u64).to_be_bytes());
    hasher.update(event_id.as_str().as_bytes());
    hasher.update(identity_id.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
