//! # Field Values
//!
//! Objects are ordered maps from field name to a closed set of tagged values.
//! The JSON wire encoding uses `__type` markers for the non-JSON variants:
//!
//! - `{"__type": "Date", "iso": "2024-01-01T00:00:00.000Z"}`
//! - `{"__type": "Pointer", "className": "Game", "objectId": "x1"}`
//! - `{"__type": "GeoPoint", "latitude": 1.0, "longitude": 2.0}`
//! - `{"__type": "File", "name": "a.png", "url": "..."}`

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number, Value};

use crate::errors::{ApiError, ApiResult};

/// An object's fields, in insertion order
pub type Document = IndexMap<String, FieldValue>;

/// Reference to an object in another class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: String,
}

impl Pointer {
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    /// Kept as a JSON number so integers survive a round trip unchanged
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Pointer(Pointer),
    GeoPoint { latitude: f64, longitude: f64 },
    File { name: String, url: Option<String> },
    Array(Vec<FieldValue>),
    Object(Document),
}

impl FieldValue {
    /// Decode a value from its JSON wire form
    pub fn from_json(value: &Value) -> ApiResult<Self> {
        match value {
            Value::Null => Ok(FieldValue::Null),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) => Ok(FieldValue::Number(n.clone())),
            Value::String(s) => Ok(FieldValue::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(FieldValue::from_json)
                .collect::<ApiResult<Vec<_>>>()
                .map(FieldValue::Array),
            Value::Object(map) => Self::from_json_object(map),
        }
    }

    fn from_json_object(map: &Map<String, Value>) -> ApiResult<Self> {
        if map.contains_key("__op") {
            return Err(ApiError::InvalidJson(
                "operators are only allowed on top-level fields".to_string(),
            ));
        }

        let Some(type_tag) = map.get("__type") else {
            let mut doc = Document::with_capacity(map.len());
            for (key, value) in map {
                if key.contains('$') || key.contains('.') {
                    return Err(ApiError::invalid_key(
                        "Nested keys should not contain the '$' or '.' characters",
                    ));
                }
                doc.insert(key.clone(), FieldValue::from_json(value)?);
            }
            return Ok(FieldValue::Object(doc));
        };

        match type_tag.as_str() {
            Some("Date") => {
                let iso = map
                    .get("iso")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::incorrect_type("Date is missing iso"))?;
                parse_date(iso).map(FieldValue::Date)
            }
            Some("Pointer") => {
                let class_name = map.get("className").and_then(Value::as_str);
                let object_id = map.get("objectId").and_then(Value::as_str);
                match (class_name, object_id) {
                    (Some(class_name), Some(object_id)) => {
                        Ok(FieldValue::Pointer(Pointer::new(class_name, object_id)))
                    }
                    _ => Err(ApiError::incorrect_type(
                        "Pointer requires className and objectId",
                    )),
                }
            }
            Some("GeoPoint") => {
                let latitude = map.get("latitude").and_then(Value::as_f64);
                let longitude = map.get("longitude").and_then(Value::as_f64);
                match (latitude, longitude) {
                    (Some(lat), Some(lng))
                        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
                    {
                        Ok(FieldValue::GeoPoint {
                            latitude: lat,
                            longitude: lng,
                        })
                    }
                    _ => Err(ApiError::InvalidJson("invalid GeoPoint".to_string())),
                }
            }
            Some("File") => {
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::incorrect_type("File is missing name"))?;
                Ok(FieldValue::File {
                    name: name.to_string(),
                    url: map.get("url").and_then(Value::as_str).map(str::to_string),
                })
            }
            other => Err(ApiError::InvalidJson(format!(
                "unsupported __type: {}",
                other.unwrap_or("<non-string>")
            ))),
        }
    }

    /// Encode this value in its JSON wire form
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => Value::Number(n.clone()),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Date(dt) => json!({ "__type": "Date", "iso": format_date(dt) }),
            FieldValue::Pointer(p) => json!({
                "__type": "Pointer",
                "className": p.class_name,
                "objectId": p.object_id,
            }),
            FieldValue::GeoPoint {
                latitude,
                longitude,
            } => json!({ "__type": "GeoPoint", "latitude": latitude, "longitude": longitude }),
            FieldValue::File { name, url } => {
                let mut map = Map::new();
                map.insert("__type".into(), json!("File"));
                map.insert("name".into(), json!(name));
                if let Some(url) = url {
                    map.insert("url".into(), json!(url));
                }
                Value::Object(map)
            }
            FieldValue::Array(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::Object(doc) => Value::Object(
                doc.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Boolean",
            FieldValue::Number(_) => "Number",
            FieldValue::String(_) => "String",
            FieldValue::Date(_) => "Date",
            FieldValue::Pointer(_) => "Pointer",
            FieldValue::GeoPoint { .. } => "GeoPoint",
            FieldValue::File { .. } => "File",
            FieldValue::Array(_) => "Array",
            FieldValue::Object(_) => "Object",
        }
    }

    pub fn from_i64(n: i64) -> Self {
        FieldValue::Number(Number::from(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        FieldValue::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            FieldValue::Date(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self {
            FieldValue::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            FieldValue::Object(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_document_mut(&mut self) -> Option<&mut Document> {
        match self {
            FieldValue::Object(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Equality used by queries and array operators.
    ///
    /// Numbers compare by value (`1 == 1.0`), pointers by class and id.
    pub fn loosely_equals(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.as_f64() == b.as_f64(),
            (FieldValue::Pointer(a), FieldValue::Pointer(b)) => a == b,
            (FieldValue::Array(a), FieldValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            (FieldValue::Object(a), FieldValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|w| v.loosely_equals(w)).unwrap_or(false))
            }
            _ => self == other,
        }
    }

    /// Ordering between comparable values of the same kind
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Number(a), FieldValue::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (FieldValue::String(a), FieldValue::String(b)) => Some(a.cmp(b)),
            (FieldValue::Date(a), FieldValue::Date(b)) => Some(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FieldValue::from_json(&value).map_err(serde::de::Error::custom)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::from_i64(n)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(dt: DateTime<Utc>) -> Self {
        FieldValue::Date(dt)
    }
}

impl From<Pointer> for FieldValue {
    fn from(p: Pointer) -> Self {
        FieldValue::Pointer(p)
    }
}

/// Millisecond-precision UTC timestamp, e.g. `2024-01-01T00:00:00.000Z`
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_date(iso: &str) -> ApiResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ApiError::incorrect_type(format!("invalid date: {}", iso)))
}

/// Decode a top-level JSON object into a document
pub fn document_from_json(map: &Map<String, Value>) -> ApiResult<Document> {
    let mut doc = Document::with_capacity(map.len());
    for (key, value) in map {
        doc.insert(key.clone(), FieldValue::from_json(value)?);
    }
    Ok(doc)
}

/// Encode a top-level document.
///
/// `createdAt` and `updatedAt` are emitted as plain ISO strings.
pub fn document_to_json(doc: &Document) -> Value {
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        let encoded = match (key.as_str(), value) {
            ("createdAt" | "updatedAt", FieldValue::Date(dt)) => Value::String(format_date(dt)),
            _ => value.to_json(),
        };
        map.insert(key.clone(), encoded);
    }
    Value::Object(map)
}

/// Random 10-character alphanumeric object id
pub fn new_object_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}
