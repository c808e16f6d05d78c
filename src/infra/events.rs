//! Event registry over a document store

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::domain::{Event, EventId, IdentityId};

use super::document::{collections, encode_fields};
use super::{CheckinError, DocumentStore, EventRegistry, QueryOp, Result};

const MAX_REGISTRATION_ATTEMPTS: usize = 8;

pub struct DocumentEventRegistry {
    store: Arc<dyn DocumentStore>,
}

impl DocumentEventRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventRegistry for DocumentEventRegistry {
    async fn create_event(&self, event: Event) -> Result<Event> {
        if event.event_id.as_str().trim().is_empty() {
            return Err(CheckinError::Validation("event_id is required".into()));
        }

        let created = self
            .store
            .create(
                collections::EVENTS,
                event.event_id.as_str(),
                encode_fields(&event)?,
            )
            .await?;
        if !created {
            return Err(CheckinError::AlreadyExists(format!(
                "event {}",
                event.event_id
            )));
        }

        tracing::info!(event_id = %event.event_id, "event created");
        Ok(event)
    }

    async fn get_event(&self, event_id: &EventId) -> Result<Option<Event>> {
        self.store
            .get(collections::EVENTS, event_id.as_str())
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    async fn register_identities(
        &self,
        event_id: &EventId,
        identity_ids: Vec<IdentityId>,
    ) -> Result<Event> {
        for _ in 0..MAX_REGISTRATION_ATTEMPTS {
            let doc = self
                .store
                .get(collections::EVENTS, event_id.as_str())
                .await?
                .ok_or_else(|| CheckinError::EventNotFound(event_id.to_string()))?;

            let mut event: Event = doc.decode()?;
            let before = event.registered_identity_ids.len();
            event
                .registered_identity_ids
                .extend(identity_ids.iter().cloned());
            if event.registered_identity_ids.len() == before {
                return Ok(event);
            }

            if self
                .store
                .compare_and_set(
                    collections::EVENTS,
                    event_id.as_str(),
                    doc.version,
                    encode_fields(&event)?,
                )
                .await?
            {
                tracing::info!(
                    event_id = %event_id,
                    added = event.registered_identity_ids.len() - before,
                    "identities registered for event"
                );
                return Ok(event);
            }
        }

        Err(CheckinError::VersionConflict {
            collection: collections::EVENTS.to_string(),
            id: event_id.to_string(),
        })
    }

    async fn list_events(&self) -> Result<Vec<Event>> {
        self.store
            .list(collections::EVENTS)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    async fn events_for_identity(&self, identity_id: &IdentityId) -> Result<Vec<Event>> {
        self.store
            .query(
                collections::EVENTS,
                "registered_identity_ids",
                QueryOp::ArrayContains,
                json!(identity_id.as_str()),
            )
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }
}
