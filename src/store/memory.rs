//! # In-Memory Store
//!
//! Process-local `Store` used by the server binary and by tests. Every class
//! is a vector of documents in insertion order; each call holds the class
//! map lock for its whole duration, so single-document updates are atomic.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Number;

use super::errors::{StoreError, StoreResult};
use super::{Store, StoreUpdate, Updates};
use crate::query::{lookup_path, FindOptions, OrderBy, Query};
use crate::schema::{ClassSchema, ROLE_CLASS, SESSION_CLASS, USER_CLASS};
use crate::value::{Document, FieldValue};

/// In-memory document store
#[derive(Debug)]
pub struct MemoryStore {
    schemas: RwLock<HashMap<String, ClassSchema>>,
    objects: RwLock<HashMap<String, Vec<Document>>>,
    unique_fields: HashMap<String, Vec<String>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let mut unique_fields = HashMap::new();
        unique_fields.insert(
            USER_CLASS.to_string(),
            vec!["username".to_string(), "email".to_string()],
        );
        unique_fields.insert(SESSION_CLASS.to_string(), vec!["sessionToken".to_string()]);
        unique_fields.insert(ROLE_CLASS.to_string(), vec!["name".to_string()]);
        Self {
            schemas: RwLock::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            unique_fields,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an additional unique field for a class
    pub fn with_unique_field(mut self, class_name: &str, field: &str) -> Self {
        self.unique_fields
            .entry(class_name.to_string())
            .or_default()
            .push(field.to_string());
        self
    }

    fn unique_fields_for(&self, class_name: &str) -> impl Iterator<Item = &str> {
        std::iter::once("objectId").chain(
            self.unique_fields
                .get(class_name)
                .into_iter()
                .flatten()
                .map(String::as_str),
        )
    }

    /// Reject `candidate` if a unique field collides with any document other
    /// than the one at `skip`
    fn check_unique(
        &self,
        class_name: &str,
        docs: &[Document],
        candidate: &Document,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        for field in self.unique_fields_for(class_name) {
            let Some(value) = candidate.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let collides = docs
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, doc)| doc.get(field).map(|v| v.loosely_equals(value)).unwrap_or(false));
            if collides {
                return Err(StoreError::Duplicate(field.to_string()));
            }
        }
        Ok(())
    }
}

fn lock_poisoned<T>(_: T) -> StoreError {
    StoreError::Internal("Lock poisoned".to_string())
}

fn add_numbers(current: &FieldValue, amount: &FieldValue) -> StoreResult<FieldValue> {
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(FieldValue::from_i64(sum));
        }
    }
    match (current.as_f64(), amount.as_f64()) {
        (Some(a), Some(b)) => Number::from_f64(a + b)
            .map(FieldValue::Number)
            .ok_or_else(|| StoreError::InvalidOperation("increment overflowed".to_string())),
        _ => Err(StoreError::InvalidOperation(format!(
            "Cannot increment a field of type {}",
            current.type_name()
        ))),
    }
}

fn array_field<'a>(
    doc: &'a mut Document,
    field: &str,
    op: &str,
) -> StoreResult<&'a mut Vec<FieldValue>> {
    let slot = doc.entry(field.to_string()).or_insert(FieldValue::Null);
    if slot.is_null() {
        *slot = FieldValue::Array(Vec::new());
    }
    match slot {
        FieldValue::Array(items) => Ok(items),
        other => Err(StoreError::InvalidOperation(format!(
            "Cannot {} on a field of type {}",
            op,
            other.type_name()
        ))),
    }
}

/// Apply updates to a document in place
pub(crate) fn apply_updates(doc: &mut Document, updates: &Updates) -> StoreResult<()> {
    for (field, update) in updates {
        match update {
            StoreUpdate::Set(value) => {
                doc.insert(field.clone(), value.clone());
            }
            StoreUpdate::Unset => {
                doc.shift_remove(field);
            }
            StoreUpdate::Increment(amount) => {
                let next = match doc.get(field) {
                    None | Some(FieldValue::Null) => amount.clone(),
                    Some(current) => add_numbers(current, amount)?,
                };
                doc.insert(field.clone(), next);
            }
            StoreUpdate::AddToArray(values) => {
                array_field(doc, field, "add")?.extend(values.iter().cloned());
            }
            StoreUpdate::AddUnique(values) => {
                let items = array_field(doc, field, "addUnique")?;
                for value in values {
                    if !items.iter().any(|item| item.loosely_equals(value)) {
                        items.push(value.clone());
                    }
                }
            }
            StoreUpdate::RemoveFromArray(values) => {
                array_field(doc, field, "remove")?
                    .retain(|item| !values.iter().any(|v| item.loosely_equals(v)));
            }
        }
    }
    Ok(())
}

fn compare_docs(a: &Document, b: &Document, order: &[OrderBy]) -> Ordering {
    for key in order {
        let ordering = match (lookup_path(a, &key.field), lookup_path(b, &key.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
        };
        let ordering = if key.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_class(&self, class_name: &str) -> StoreResult<Option<ClassSchema>> {
        let schemas = self.schemas.read().map_err(lock_poisoned)?;
        Ok(schemas.get(class_name).cloned())
    }

    async fn create_class(&self, schema: ClassSchema) -> StoreResult<()> {
        let mut schemas = self.schemas.write().map_err(lock_poisoned)?;
        if schemas.contains_key(&schema.class_name) {
            return Err(StoreError::Duplicate(schema.class_name));
        }
        schemas.insert(schema.class_name.clone(), schema);
        Ok(())
    }

    async fn update_class(&self, schema: ClassSchema) -> StoreResult<()> {
        let mut schemas = self.schemas.write().map_err(lock_poisoned)?;
        let existing = schemas
            .get_mut(&schema.class_name)
            .ok_or_else(|| StoreError::ClassNotFound(schema.class_name.clone()))?;
        existing.merge_fields(&schema);
        existing.class_level_permissions = schema.class_level_permissions;
        Ok(())
    }

    async fn create_object(&self, class_name: &str, doc: Document) -> StoreResult<()> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        let docs = objects.entry(class_name.to_string()).or_default();
        self.check_unique(class_name, docs, &doc, None)?;
        docs.push(doc);
        Ok(())
    }

    async fn find(
        &self,
        class_name: &str,
        query: &Query,
        options: &FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let objects = self.objects.read().map_err(lock_poisoned)?;
        let Some(docs) = objects.get(class_name) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<Document> = docs.iter().filter(|d| query.matches(d)).cloned().collect();
        if !options.order.is_empty() {
            results.sort_by(|a, b| compare_docs(a, b, &options.order));
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(results.into_iter().skip(options.skip).take(limit).collect())
    }

    async fn count(&self, class_name: &str, query: &Query) -> StoreResult<usize> {
        let objects = self.objects.read().map_err(lock_poisoned)?;
        Ok(objects
            .get(class_name)
            .map(|docs| docs.iter().filter(|d| query.matches(d)).count())
            .unwrap_or(0))
    }

    async fn update_one(
        &self,
        class_name: &str,
        query: &Query,
        updates: &Updates,
    ) -> StoreResult<Option<Document>> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        let Some(docs) = objects.get_mut(class_name) else {
            return Ok(None);
        };
        let Some(index) = docs.iter().position(|d| query.matches(d)) else {
            return Ok(None);
        };

        let mut updated = docs[index].clone();
        apply_updates(&mut updated, updates)?;
        self.check_unique(class_name, docs, &updated, Some(index))?;
        docs[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn update_many(
        &self,
        class_name: &str,
        query: &Query,
        updates: &Updates,
    ) -> StoreResult<usize> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        let Some(docs) = objects.get_mut(class_name) else {
            return Ok(0);
        };

        let mut staged = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if query.matches(doc) {
                let mut updated = doc.clone();
                apply_updates(&mut updated, updates)?;
                self.check_unique(class_name, docs, &updated, Some(index))?;
                staged.push((index, updated));
            }
        }

        let matched = staged.len();
        for (index, updated) in staged {
            docs[index] = updated;
        }
        Ok(matched)
    }

    async fn delete_many(&self, class_name: &str, query: &Query) -> StoreResult<usize> {
        let mut objects = self.objects.write().map_err(lock_poisoned)?;
        let Some(docs) = objects.get_mut(class_name) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !query.matches(d));
        Ok(before - docs.len())
    }
}
