//! Enrolled identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{base64_bytes, Embedding, IdentityId};

/// A fully loaded identity record, including the enrollment photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub contact: String,
    pub embedding: Embedding,
    /// Raw enrollment photo. Empty when enrolled from a client-side descriptor.
    #[serde(with = "base64_bytes", default)]
    pub reference_image: Vec<u8>,
    pub enrolled_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(
        identity_id: IdentityId,
        display_name: impl Into<String>,
        contact: impl Into<String>,
        embedding: Embedding,
        reference_image: Vec<u8>,
    ) -> Self {
        Self {
            identity_id,
            display_name: display_name.into(),
            contact: contact.into(),
            embedding,
            reference_image,
            enrolled_at: Utc::now(),
        }
    }

    /// Split into the profile document and the photo bytes, which are stored apart.
    pub fn into_parts(self) -> (IdentityProfile, Vec<u8>) {
        let has_reference_image = !self.reference_image.is_empty();
        (
            IdentityProfile {
                identity_id: self.identity_id,
                display_name: self.display_name,
                contact: self.contact,
                embedding: self.embedding,
                has_reference_image,
                enrolled_at: self.enrolled_at,
            },
            self.reference_image,
        )
    }

    pub fn from_parts(profile: IdentityProfile, reference_image: Vec<u8>) -> Self {
        Self {
            identity_id: profile.identity_id,
            display_name: profile.display_name,
            contact: profile.contact,
            embedding: profile.embedding,
            reference_image,
            enrolled_at: profile.enrolled_at,
        }
    }
}

/// Identity record without the photo; what matching and listings load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub contact: String,
    pub embedding: Embedding,
    #[serde(default)]
    pub has_reference_image: bool,
    pub enrolled_at: DateTime<Utc>,
}

/// Public view of an identity (no embedding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySummary {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub contact: String,
    pub embedding_dimension: usize,
    pub has_reference_image: bool,
    pub enrolled_at: DateTime<Utc>,
}

impl From<&IdentityProfile> for IdentitySummary {
    fn from(profile: &IdentityProfile) -> Self {
        Self {
            identity_id: profile.identity_id.clone(),
            display_name: profile.display_name.clone(),
            contact: profile.contact.clone(),
            embedding_dimension: profile.embedding.dimension(),
            has_reference_image: profile.has_reference_image,
            enrolled_at: profile.enrolled_at,
        }
    }
}

/// Whether an enrollment created a new identity or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollOutcome {
    Created,
    Replaced,
}
