//! Multipart form reading for the upload endpoints.
//!
//! Fields are looked up by a list of accepted names so older clients that
//! send `volunteer_id`, `name` or `eventId` keep working.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use bytes::Bytes;
use std::collections::HashMap;

use super::error::{missing_field, validation_error, ApiError, ErrorCode};

/// All parts of a multipart body, keyed by field name. A repeated name keeps
/// its first value.
#[derive(Debug, Default)]
pub struct FormFields {
    parts: HashMap<String, Bytes>,
}

impl FormFields {
    pub async fn read(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut parts = HashMap::new();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let data = field.bytes().await.map_err(multipart_error)?;
            parts.entry(name).or_insert(data);
        }
        Ok(Self { parts })
    }

    /// First non-blank text value among `names`.
    pub fn text(&self, names: &[&str]) -> Result<Option<String>, ApiError> {
        for name in names {
            let Some(data) = self.parts.get(*name) else {
                continue;
            };
            let value = std::str::from_utf8(data)
                .map_err(|_| validation_error(name, format!("{name} must be UTF-8 text")))?
                .trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
        Ok(None)
    }

    pub fn require_text(&self, names: &[&str]) -> Result<String, ApiError> {
        self.text(names)?
            .ok_or_else(|| missing_field(names.first().copied().unwrap_or("field")))
    }

    /// First non-empty binary part among `names`.
    pub fn require_file(&self, names: &[&str]) -> Result<Bytes, ApiError> {
        names
            .iter()
            .filter_map(|name| self.parts.get(*name))
            .find(|data| !data.is_empty())
            .cloned()
            .ok_or_else(|| missing_field(names.first().copied().unwrap_or("file")))
    }

    /// Optional numeric field.
    pub fn number(&self, names: &[&str]) -> Result<Option<f64>, ApiError> {
        match self.text(names)? {
            None => Ok(None),
            Some(raw) => raw.parse::<f64>().map(Some).map_err(|_| {
                validation_error(names[0], format!("{} must be a number", names[0]))
            }),
        }
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(ErrorCode::PayloadTooLarge, "Upload exceeds the size limit")
    } else {
        ApiError::new(ErrorCode::InvalidRequestBody, err.body_text())
    }
}
