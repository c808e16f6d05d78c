//! Attendance sessions and their registration sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::types::{EventId, IdentityId};

/// One attendance session.
///
/// `registered_identity_ids` is only changed through explicit registration;
/// marking attendance never touches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub registered_identity_ids: BTreeSet<IdentityId>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_id: EventId, title: Option<String>) -> Self {
        Self {
            event_id,
            title,
            registered_identity_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_registrations<I>(mut self, identity_ids: I) -> Self
    where
        I: IntoIterator<Item = IdentityId>,
    {
        self.registered_identity_ids.extend(identity_ids);
        self
    }

    pub fn is_registered(&self, identity_id: &IdentityId) -> bool {
        self.registered_identity_ids.contains(identity_id)
    }
}
