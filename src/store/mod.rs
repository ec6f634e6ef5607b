//! # Store
//!
//! The persistence capability the orchestrators run against. Implementations
//! must report uniqueness violations as `StoreError::Duplicate` and must apply
//! each update atomically per document.

mod client;
mod errors;
mod memory;

pub use client::StoreClient;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub(crate) use memory::apply_updates;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::query::{FindOptions, Query};
use crate::schema::ClassSchema;
use crate::value::{Document, FieldValue};

/// Field-level update applied by the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    Set(FieldValue),
    Unset,
    /// Add to a numeric field; a missing field starts at zero
    Increment(FieldValue),
    AddToArray(Vec<FieldValue>),
    /// Append only values not already present
    AddUnique(Vec<FieldValue>),
    /// Remove every occurrence of each value
    RemoveFromArray(Vec<FieldValue>),
}

/// Updates keyed by field name, applied in order
pub type Updates = IndexMap<String, StoreUpdate>;

/// Document persistence keyed by class name
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Stored schema of a class
    async fn get_class(&self, class_name: &str) -> StoreResult<Option<ClassSchema>>;

    /// Persist a new class schema
    async fn create_class(&self, schema: ClassSchema) -> StoreResult<()>;

    /// Additively merge fields into an existing class schema and replace its
    /// class-level permissions
    async fn update_class(&self, schema: ClassSchema) -> StoreResult<()>;

    async fn create_object(&self, class_name: &str, doc: Document) -> StoreResult<()>;

    async fn find(
        &self,
        class_name: &str,
        query: &Query,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>>;

    async fn count(&self, class_name: &str, query: &Query) -> StoreResult<usize>;

    /// Update the first match and return it as stored afterwards
    async fn update_one(
        &self,
        class_name: &str,
        query: &Query,
        updates: &Updates,
    ) -> StoreResult<Option<Document>>;

    /// Update every match and return how many matched
    async fn update_many(
        &self,
        class_name: &str,
        query: &Query,
        updates: &Updates,
    ) -> StoreResult<usize>;

    /// Delete every match and return how many were removed
    async fn delete_many(&self, class_name: &str, query: &Query) -> StoreResult<usize>;
}
