//! In-memory document store
//!
//! Each instance owns its own map, so tests can run isolated stores in
//! parallel. Also used for `DATABASE_URL=memory` local runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::document::merge_fields;
use super::{Document, DocumentStore, QueryOp, Result};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<Document> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let version = docs.get(id).map(|doc| doc.version + 1).unwrap_or(1);
        let doc = Document {
            id: id.to_string(),
            fields,
            version,
        };
        docs.insert(id.to_string(), doc.clone());
        Ok(doc)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(false);
        };
        merge_fields(&mut doc.fields, patch)?;
        doc.version += 1;
        Ok(true)
    }

    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Ok(false);
        }
        docs.insert(
            id.to_string(),
            Document {
                id: id.to_string(),
                fields,
                version: 1,
            },
        );
        Ok(true)
    }

    async fn compare_and_set(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        fields: Value,
    ) -> Result<bool> {
        let mut collections = self.collections.write().await;
        match collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        {
            Some(doc) if doc.version == expected_version => {
                doc.fields = fields;
                doc.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some())
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Value,
    ) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| op.matches(doc.field(field), &value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
