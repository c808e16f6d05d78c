//! Deadline decorator for document stores
//!
//! Every call is bounded by a timeout; an expired call becomes a retryable
//! [`CheckinError::Timeout`] instead of hanging the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CheckinError, Document, DocumentStore, QueryOp, Result};

pub struct TimedDocumentStore {
    inner: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TimedDocumentStore {
    pub fn new(inner: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "document store call timed out"
                );
                Err(CheckinError::Timeout(format!("store.{operation}")))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for TimedDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.bounded("get", self.inner.get(collection, id)).await
    }

    async fn set(&self, collection: &str, id: &str, fields: Value) -> Result<Document> {
        self.bounded("set", self.inner.set(collection, id, fields))
            .await
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool> {
        self.bounded("update", self.inner.update(collection, id, patch))
            .await
    }

    async fn create(&self, collection: &str, id: &str, fields: Value) -> Result<bool> {
        self.bounded("create", self.inner.create(collection, id, fields))
            .await
    }

    async fn compare_and_set(
        &self,
        collection: &str,
        id: &str,
        expected_version: u64,
        fields: Value,
    ) -> Result<bool> {
        self.bounded(
            "compare_and_set",
            self.inner
                .compare_and_set(collection, id, expected_version, fields),
        )
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        self.bounded("delete", self.inner.delete(collection, id))
            .await
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: Value,
    ) -> Result<Vec<Document>> {
        self.bounded("query", self.inner.query(collection, field, op, value))
            .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        self.bounded("list", self.inner.list(collection)).await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.inner.ping()).await
    }
}
