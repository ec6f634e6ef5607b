//! # Field Operations
//!
//! A create or update body maps each field either to a plain value or to an
//! atomic operator:
//!
//! ```text
//! {"score": {"__op": "Increment", "amount": 1}}
//! {"tags":  {"__op": "AddUnique", "objects": ["a"]}}
//! {"owner": {"__op": "Delete"}}
//! {"members": {"__op": "AddRelation", "objects": [{"__type": "Pointer", ...}]}}
//! ```

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::client_sdk::ClientSdk;
use crate::acl::{Acl, ACL_FIELD};
use crate::errors::{ApiError, ApiResult};
use crate::schema::{validate_field_name, FieldType};
use crate::store::{StoreUpdate, Updates};
use crate::value::{Document, FieldValue, Pointer};

/// Operation on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(FieldValue),
    Delete,
    Increment(FieldValue),
    Add(Vec<FieldValue>),
    AddUnique(Vec<FieldValue>),
    Remove(Vec<FieldValue>),
    AddRelation(Vec<Pointer>),
    RemoveRelation(Vec<Pointer>),
}

/// Operations keyed by field, in body order
pub type FieldOps = IndexMap<String, FieldOp>;

impl FieldOp {
    /// Decode one body value
    pub fn from_json(field: &str, value: &Value) -> ApiResult<Self> {
        let Some(op) = value.as_object().and_then(|m| m.get("__op")) else {
            return FieldValue::from_json(value).map(FieldOp::Set);
        };

        match op.as_str() {
            Some("Delete") => Ok(FieldOp::Delete),
            Some("Increment") => {
                let amount = value.get("amount").filter(|a| a.is_number()).ok_or_else(|| {
                    ApiError::InvalidJson("incrementing must provide a number".to_string())
                })?;
                FieldValue::from_json(amount).map(FieldOp::Increment)
            }
            Some("Add") => objects(field, value).map(FieldOp::Add),
            Some("AddUnique") => objects(field, value).map(FieldOp::AddUnique),
            Some("Remove") => objects(field, value).map(FieldOp::Remove),
            Some("AddRelation") => pointers(field, value).map(FieldOp::AddRelation),
            Some("RemoveRelation") => pointers(field, value).map(FieldOp::RemoveRelation),
            other => Err(ApiError::InvalidJson(format!(
                "The {} operator is not supported",
                other.unwrap_or("<non-string>")
            ))),
        }
    }

    /// Type the operation writes, if any
    pub fn implied_type(&self) -> Option<FieldType> {
        match self {
            FieldOp::Set(value) => FieldType::infer(value),
            FieldOp::Delete => None,
            FieldOp::Increment(_) => Some(FieldType::Number),
            FieldOp::Add(_) | FieldOp::AddUnique(_) | FieldOp::Remove(_) => Some(FieldType::Array),
            FieldOp::AddRelation(p) | FieldOp::RemoveRelation(p) => p
                .first()
                .map(|p| FieldType::relation(p.class_name.clone())),
        }
    }

    /// Value stored when the object does not exist yet
    pub fn initial_value(&self) -> Option<FieldValue> {
        match self {
            FieldOp::Set(FieldValue::Null) | FieldOp::Delete => None,
            FieldOp::Set(value) | FieldOp::Increment(value) => Some(value.clone()),
            FieldOp::Add(values) => Some(FieldValue::Array(values.clone())),
            FieldOp::AddUnique(values) => {
                let mut unique: Vec<FieldValue> = Vec::with_capacity(values.len());
                for value in values {
                    if !unique.iter().any(|u| u.loosely_equals(value)) {
                        unique.push(value.clone());
                    }
                }
                Some(FieldValue::Array(unique))
            }
            FieldOp::Remove(_) => Some(FieldValue::Array(Vec::new())),
            FieldOp::AddRelation(_) | FieldOp::RemoveRelation(_) => None,
        }
    }

    /// Store update for an existing object; relations live outside the
    /// object
    pub fn to_store_update(&self) -> Option<StoreUpdate> {
        Some(match self {
            FieldOp::Set(value) => StoreUpdate::Set(value.clone()),
            FieldOp::Delete => StoreUpdate::Unset,
            FieldOp::Increment(amount) => StoreUpdate::Increment(amount.clone()),
            FieldOp::Add(values) => StoreUpdate::AddToArray(values.clone()),
            FieldOp::AddUnique(values) => StoreUpdate::AddUnique(values.clone()),
            FieldOp::Remove(values) => StoreUpdate::RemoveFromArray(values.clone()),
            FieldOp::AddRelation(_) | FieldOp::RemoveRelation(_) => return None,
        })
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldOp::AddRelation(_) | FieldOp::RemoveRelation(_))
    }

    /// Whether the result is computed by the server rather than echoed
    pub fn is_server_computed(&self) -> bool {
        matches!(
            self,
            FieldOp::Increment(_) | FieldOp::Add(_) | FieldOp::AddUnique(_) | FieldOp::Remove(_)
        )
    }
}

fn objects(field: &str, value: &Value) -> ApiResult<Vec<FieldValue>> {
    value
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ApiError::InvalidJson(format!("objects to modify in {} must be an array", field))
        })?
        .iter()
        .map(FieldValue::from_json)
        .collect()
}

fn pointers(field: &str, value: &Value) -> ApiResult<Vec<Pointer>> {
    let mut pointers = Vec::new();
    for object in objects(field, value)? {
        match object {
            FieldValue::Pointer(p) => pointers.push(p),
            other => {
                return Err(ApiError::InvalidJson(format!(
                    "relation objects must be pointers, got {}",
                    other.type_name()
                )))
            }
        }
    }
    if let Some(first) = pointers.first() {
        if pointers.iter().any(|p| p.class_name != first.class_name) {
            return Err(ApiError::InvalidJson(
                "all objects in a relation must have the same class".to_string(),
            ));
        }
    }
    Ok(pointers)
}

/// Decode a request body into field operations
pub fn parse_body(body: &Map<String, Value>) -> ApiResult<FieldOps> {
    body.iter()
        .map(|(field, value)| Ok((field.clone(), FieldOp::from_json(field, value)?)))
        .collect()
}

/// Check client field names and the shape of reserved fields
pub fn validate_ops(ops: &FieldOps) -> ApiResult<()> {
    for (field, op) in ops {
        validate_field_name(field)?;
        match (field.as_str(), op) {
            (ACL_FIELD, FieldOp::Set(value)) => {
                Acl::from_value(value)?;
            }
            (ACL_FIELD, FieldOp::Delete) => {}
            (ACL_FIELD, _) => {
                return Err(ApiError::InvalidAcl(
                    "ACL cannot be modified with an operator".to_string(),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

/// Store updates for every non-relation operation
pub fn to_updates(ops: &FieldOps) -> Updates {
    ops.iter()
        .filter_map(|(field, op)| op.to_store_update().map(|u| (field.clone(), u)))
        .collect()
}

/// Fields a before hook changed and fields it removed, relative to the
/// object it was given
pub fn hook_changes(given: &Document, returned: &Document) -> (Vec<String>, Vec<String>) {
    let changed = returned
        .iter()
        .filter(|(field, value)| {
            given
                .get(*field)
                .map(|before| !before.loosely_equals(value))
                .unwrap_or(true)
        })
        .map(|(field, _)| field.clone())
        .collect();
    let removed = given
        .keys()
        .filter(|field| !returned.contains_key(*field))
        .cloned()
        .collect();
    (changed, removed)
}

/// Report hook rewrites in a save response. Internal fields and passwords
/// are never echoed.
pub fn add_hook_changes(
    response: &mut serde_json::Map<String, Value>,
    changed: &[String],
    removed: &[String],
    saved: &Document,
    client: Option<&ClientSdk>,
) {
    let hidden = |field: &str| field.starts_with('_') || field == "password";
    for field in changed {
        if hidden(field) || response.contains_key(field) {
            continue;
        }
        if let Some(value) = saved.get(field) {
            response.insert(field.clone(), value.to_json());
        }
    }
    if ClientSdk::supports_forward_delete(client) {
        for field in removed.iter().filter(|f| !hidden(f.as_str())) {
            response.insert(field.clone(), serde_json::json!({"__op": "Delete"}));
        }
    }
}
