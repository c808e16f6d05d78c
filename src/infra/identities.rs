//! Embedding Store over a document store
//!
//! Profiles (with embeddings) live in `identities`; enrollment photos are kept
//! in `identity_images` so matching never loads image bytes. The deployment's
//! embedding dimensionality is pinned in the `deployment` collection by the
//! first enrollment, or up front by configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::{base64_bytes, EnrollOutcome, Identity, IdentityId, IdentityProfile};
use crate::matcher::Candidate;

use super::document::{collections, encode_fields};
use super::{CheckinError, DocumentStore, EmbeddingStore, Result};

const DIMENSION_DOC: &str = "embedding";

#[derive(Serialize, Deserialize)]
struct DimensionSetting {
    dimension: usize,
}

#[derive(Serialize, Deserialize)]
struct StoredImage {
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

pub struct DocumentEmbeddingStore {
    store: Arc<dyn DocumentStore>,
    configured_dimension: Option<usize>,
}

impl DocumentEmbeddingStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            configured_dimension: None,
        }
    }

    /// Pin the dimensionality before any enrollment.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.configured_dimension = dimension;
        self
    }

    async fn stored_dimension(&self) -> Result<Option<usize>> {
        match self
            .store
            .get(collections::DEPLOYMENT, DIMENSION_DOC)
            .await?
        {
            Some(doc) => Ok(Some(doc.decode::<DimensionSetting>()?.dimension)),
            None => Ok(None),
        }
    }

    /// Check `actual` against the pinned dimension, pinning it if nothing is yet.
    async fn ensure_dimension(&self, actual: usize) -> Result<()> {
        if let Some(expected) = self.configured_dimension {
            if expected != actual {
                return Err(CheckinError::DimensionMismatch { expected, actual });
            }
        }

        if let Some(expected) = self.stored_dimension().await? {
            if expected != actual {
                return Err(CheckinError::DimensionMismatch { expected, actual });
            }
            return Ok(());
        }

        let pinned = self
            .store
            .create(
                collections::DEPLOYMENT,
                DIMENSION_DOC,
                encode_fields(&DimensionSetting { dimension: actual })?,
            )
            .await?;

        if !pinned {
            // Another enrollment pinned it first; re-check against the winner.
            if let Some(expected) = self.stored_dimension().await? {
                if expected != actual {
                    return Err(CheckinError::DimensionMismatch { expected, actual });
                }
            }
        } else {
            tracing::info!(dimension = actual, "pinned embedding dimension");
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingStore for DocumentEmbeddingStore {
    async fn enroll(&self, identity: Identity) -> Result<EnrollOutcome> {
        if identity.identity_id.as_str().trim().is_empty() {
            return Err(CheckinError::Validation("identity_id is required".into()));
        }
        if !identity.embedding.is_well_formed() {
            return Err(CheckinError::InvalidEmbedding(
                "embedding must be non-empty and finite".into(),
            ));
        }
        self.ensure_dimension(identity.embedding.dimension()).await?;

        let id = identity.identity_id.as_str().to_string();
        let (profile, image) = identity.into_parts();
        let existed = self.store.get(collections::IDENTITIES, &id).await?.is_some();

        if image.is_empty() {
            self.store.delete(collections::IDENTITY_IMAGES, &id).await?;
        } else {
            self.store
                .set(
                    collections::IDENTITY_IMAGES,
                    &id,
                    encode_fields(&StoredImage { data: image })?,
                )
                .await?;
        }
        self.store
            .set(collections::IDENTITIES, &id, encode_fields(&profile)?)
            .await?;

        let outcome = if existed {
            EnrollOutcome::Replaced
        } else {
            EnrollOutcome::Created
        };
        tracing::info!(
            identity_id = %id,
            dimension = profile.embedding.dimension(),
            ?outcome,
            "identity enrolled"
        );
        Ok(outcome)
    }

    async fn get(&self, identity_id: &IdentityId) -> Result<Option<Identity>> {
        let Some(profile) = self.get_profile(identity_id).await? else {
            return Ok(None);
        };
        let image = self.reference_image(identity_id).await?.unwrap_or_default();
        Ok(Some(Identity::from_parts(profile, image)))
    }

    async fn get_profile(&self, identity_id: &IdentityId) -> Result<Option<IdentityProfile>> {
        self.store
            .get(collections::IDENTITIES, identity_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn reference_image(&self, identity_id: &IdentityId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store
            .get(collections::IDENTITY_IMAGES, identity_id.as_str())
            .await?
            .map(|doc| doc.decode::<StoredImage>())
            .transpose()?
            .map(|image| image.data))
    }

    async fn list_profiles(&self) -> Result<Vec<IdentityProfile>> {
        self.store
            .list(collections::IDENTITIES)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    async fn candidates(
        &self,
        restrict_to: Option<BTreeSet<IdentityId>>,
    ) -> Result<Vec<Candidate>> {
        let profiles = match restrict_to {
            None => self.list_profiles().await?,
            Some(ids) if ids.is_empty() => Vec::new(),
            Some(ids) => {
                let values: Vec<_> = ids.iter().map(|id| json!(id.as_str())).collect();
                self.store
                    .query(
                        collections::IDENTITIES,
                        "identity_id",
                        super::QueryOp::In,
                        json!(values),
                    )
                    .await?
                    .iter()
                    .map(|doc| doc.decode::<IdentityProfile>())
                    .collect::<Result<_>>()?
            }
        };

        Ok(profiles
            .into_iter()
            .map(|profile| Candidate {
                identity_id: profile.identity_id,
                embedding: profile.embedding,
            })
            .collect())
    }

    async fn update_profile(
        &self,
        identity_id: &IdentityId,
        display_name: Option<String>,
        contact: Option<String>,
    ) -> Result<bool> {
        let mut patch = serde_json::Map::new();
        if let Some(name) = display_name {
            patch.insert("display_name".into(), json!(name));
        }
        if let Some(contact) = contact {
            patch.insert("contact".into(), json!(contact));
        }
        if patch.is_empty() {
            return Ok(self.get_profile(identity_id).await?.is_some());
        }
        self.store
            .update(
                collections::IDENTITIES,
                identity_id.as_str(),
                serde_json::Value::Object(patch),
            )
            .await
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        match self.stored_dimension().await? {
            Some(d) => Ok(Some(d)),
            None => Ok(self.configured_dimension),
        }
    }
}
