//! # Store Client
//!
//! Wraps a `Store` with a per-call deadline. Each call runs as its own task,
//! so a call that times out, or whose request is dropped, still runs to
//! completion instead of leaving a write half-applied.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::errors::StoreResult;
use super::{Store, Updates};
use crate::errors::{ApiError, ApiResult};
use crate::query::{FindOptions, Query};
use crate::schema::ClassSchema;
use crate::value::Document;

/// Timeout-bounded handle to the shared store
#[derive(Debug, Clone)]
pub struct StoreClient {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl StoreClient {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> ApiResult<T>
    where
        F: FnOnce(Arc<dyn Store>) -> Fut,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::spawn(f(self.store.clone()));
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => result.map_err(ApiError::from),
            Ok(Err(join_err)) => Err(ApiError::internal(format!(
                "store {} task failed: {}",
                op, join_err
            ))),
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "store call timed out");
                Err(ApiError::Timeout(format!("store {}", op)))
            }
        }
    }

    pub async fn get_class(&self, class_name: &str) -> ApiResult<Option<ClassSchema>> {
        let class_name = class_name.to_string();
        self.call("get_class", move |store| async move {
            store.get_class(&class_name).await
        })
        .await
    }

    pub async fn create_class(&self, schema: ClassSchema) -> ApiResult<()> {
        self.call("create_class", move |store| async move {
            store.create_class(schema).await
        })
        .await
    }

    pub async fn update_class(&self, schema: ClassSchema) -> ApiResult<()> {
        self.call("update_class", move |store| async move {
            store.update_class(schema).await
        })
        .await
    }

    pub async fn create_object(&self, class_name: &str, doc: Document) -> ApiResult<()> {
        let class_name = class_name.to_string();
        self.call("create_object", move |store| async move {
            store.create_object(&class_name, doc).await
        })
        .await
    }

    pub async fn find(
        &self,
        class_name: &str,
        query: &Query,
        options: &FindOptions,
    ) -> ApiResult<Vec<Document>> {
        let class_name = class_name.to_string();
        let query = query.clone();
        let options = options.clone();
        self.call("find", move |store| async move {
            store.find(&class_name, &query, &options).await
        })
        .await
    }

    /// First match, if any
    pub async fn find_one(&self, class_name: &str, query: &Query) -> ApiResult<Option<Document>> {
        let mut found = self.find(class_name, query, &FindOptions::first()).await?;
        Ok(if found.is_empty() {
            None
        } else {
            Some(found.swap_remove(0))
        })
    }

    pub async fn count(&self, class_name: &str, query: &Query) -> ApiResult<usize> {
        let class_name = class_name.to_string();
        let query = query.clone();
        self.call("count", move |store| async move {
            store.count(&class_name, &query).await
        })
        .await
    }

    pub async fn update_one(
        &self,
        class_name: &str,
        query: &Query,
        updates: Updates,
    ) -> ApiResult<Option<Document>> {
        let class_name = class_name.to_string();
        let query = query.clone();
        self.call("update_one", move |store| async move {
            store.update_one(&class_name, &query, &updates).await
        })
        .await
    }

    pub async fn update_many(
        &self,
        class_name: &str,
        query: &Query,
        updates: Updates,
    ) -> ApiResult<usize> {
        let class_name = class_name.to_string();
        let query = query.clone();
        self.call("update_many", move |store| async move {
            store.update_many(&class_name, &query, &updates).await
        })
        .await
    }

    pub async fn delete_many(&self, class_name: &str, query: &Query) -> ApiResult<usize> {
        let class_name = class_name.to_string();
        let query = query.clone();
        self.call("delete_many", move |store| async move {
            store.delete_many(&class_name, &query).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreUpdate};
    use crate::value::FieldValue;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl Store for SlowStore {
        async fn get_class(&self, class_name: &str) -> StoreResult<Option<ClassSchema>> {
            self.inner.get_class(class_name).await
        }
        async fn create_class(&self, schema: ClassSchema) -> StoreResult<()> {
            self.inner.create_class(schema).await
        }
        async fn update_class(&self, schema: ClassSchema) -> StoreResult<()> {
            self.inner.update_class(schema).await
        }
        async fn create_object(&self, class_name: &str, doc: Document) -> StoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.create_object(class_name, doc).await
        }
        async fn find(
            &self,
            class_name: &str,
            query: &Query,
            options: &FindOptions,
        ) -> StoreResult<Vec<Document>> {
            self.inner.find(class_name, query, options).await
        }
        async fn count(&self, class_name: &str, query: &Query) -> StoreResult<usize> {
            self.inner.count(class_name, query).await
        }
        async fn update_one(
            &self,
            class_name: &str,
            query: &Query,
            updates: &Updates,
        ) -> StoreResult<Option<Document>> {
            self.inner.update_one(class_name, query, updates).await
        }
        async fn update_many(
            &self,
            class_name: &str,
            query: &Query,
            updates: &Updates,
        ) -> StoreResult<usize> {
            self.inner.update_many(class_name, query, updates).await
        }
        async fn delete_many(&self, class_name: &str, query: &Query) -> StoreResult<usize> {
            self.inner.delete_many(class_name, query).await
        }
    }

    #[tokio::test]
    async fn test_timed_out_write_still_completes() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let client = StoreClient::new(store.clone(), Duration::from_millis(10));

        let mut doc = Document::new();
        doc.insert("objectId".into(), FieldValue::string("a"));
        let err = client.create_object("Game", doc).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.count("Game", &Query::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_one_and_update() {
        let client = StoreClient::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let mut doc = Document::new();
        doc.insert("objectId".into(), FieldValue::string("a"));
        doc.insert("n".into(), FieldValue::from_i64(1));
        client.create_object("Game", doc).await.unwrap();

        let mut updates = Updates::new();
        updates.insert("n".into(), StoreUpdate::Set(FieldValue::from_i64(2)));
        client
            .update_one("Game", &Query::by_id("a"), updates)
            .await
            .unwrap();

        let found = client.find_one("Game", &Query::by_id("a")).await.unwrap().unwrap();
        assert_eq!(found["n"], FieldValue::from_i64(2));
        assert!(client
            .find_one("Game", &Query::by_id("b"))
            .await
            .unwrap()
            .is_none());
    }
}
