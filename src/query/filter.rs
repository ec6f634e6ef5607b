//! # Filter Expression AST
//!
//! A `Query` is a conjunction of clauses evaluated against a document.
//! The ACL read/write restriction is itself a clause so that it composes
//! with client filters before pagination.

use std::cmp::Ordering;

use regex::Regex;

use crate::acl::{object_permits, Access};
use crate::value::{Document, FieldValue, Pointer};

/// Constraint on a single field
#[derive(Debug, Clone)]
pub enum Constraint {
    Eq(FieldValue),
    Ne(FieldValue),
    Lt(FieldValue),
    Lte(FieldValue),
    Gt(FieldValue),
    Gte(FieldValue),
    In(Vec<FieldValue>),
    NotIn(Vec<FieldValue>),
    Exists(bool),
    All(Vec<FieldValue>),
    Regex(Regex),
}

impl Constraint {
    /// Operator name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Constraint::Eq(_) => "$eq",
            Constraint::Ne(_) => "$ne",
            Constraint::Lt(_) => "$lt",
            Constraint::Lte(_) => "$lte",
            Constraint::Gt(_) => "$gt",
            Constraint::Gte(_) => "$gte",
            Constraint::In(_) => "$in",
            Constraint::NotIn(_) => "$nin",
            Constraint::Exists(_) => "$exists",
            Constraint::All(_) => "$all",
            Constraint::Regex(_) => "$regex",
        }
    }

    fn matches(&self, field_value: Option<&FieldValue>) -> bool {
        match self {
            Constraint::Eq(expected) => equals(field_value, expected),
            Constraint::Ne(expected) => !equals(field_value, expected),
            Constraint::Lt(bound) => ordered(field_value, bound, |o| o == Ordering::Less),
            Constraint::Lte(bound) => ordered(field_value, bound, |o| o != Ordering::Greater),
            Constraint::Gt(bound) => ordered(field_value, bound, |o| o == Ordering::Greater),
            Constraint::Gte(bound) => ordered(field_value, bound, |o| o != Ordering::Less),
            Constraint::In(list) => list.iter().any(|v| equals(field_value, v)),
            Constraint::NotIn(list) => !list.iter().any(|v| equals(field_value, v)),
            Constraint::Exists(expected) => {
                let present = matches!(field_value, Some(v) if !v.is_null());
                present == *expected
            }
            Constraint::All(list) => match field_value {
                Some(FieldValue::Array(items)) => list
                    .iter()
                    .all(|v| items.iter().any(|item| item.loosely_equals(v))),
                _ => false,
            },
            Constraint::Regex(re) => field_value
                .and_then(FieldValue::as_str)
                .map(|s| re.is_match(s))
                .unwrap_or(false),
        }
    }
}

/// Equality with array-contains semantics; a missing field equals `null`
fn equals(field_value: Option<&FieldValue>, expected: &FieldValue) -> bool {
    match field_value {
        None => expected.is_null(),
        Some(FieldValue::Array(items)) if !matches!(expected, FieldValue::Array(_)) => {
            items.iter().any(|item| item.loosely_equals(expected))
        }
        Some(value) => value.loosely_equals(expected),
    }
}

fn ordered(field_value: Option<&FieldValue>, bound: &FieldValue, pred: fn(Ordering) -> bool) -> bool {
    field_value
        .and_then(|v| v.compare(bound))
        .map(pred)
        .unwrap_or(false)
}

/// One conjunct of a query
#[derive(Debug, Clone)]
pub enum Clause {
    /// Constraint on a (possibly dotted) field path
    Field {
        field: String,
        constraint: Constraint,
    },

    /// At least one sub-query matches
    Or(Vec<Query>),

    /// Every sub-query matches
    And(Vec<Query>),

    /// Objects in the `key` relation of `object`.
    ///
    /// Resolved into an `objectId` constraint before reaching the store.
    RelatedTo { object: Pointer, key: String },

    /// The object's ACL grants `access` to one of `identities`
    Permission {
        access: Access,
        identities: Vec<String>,
    },
}

impl Clause {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Clause::Field { field, constraint } => constraint.matches(lookup_path(doc, field)),
            Clause::Or(queries) => queries.iter().any(|q| q.matches(doc)),
            Clause::And(queries) => queries.iter().all(|q| q.matches(doc)),
            Clause::RelatedTo { .. } => false,
            Clause::Permission { access, identities } => object_permits(doc, *access, identities),
        }
    }
}

/// Resolve a dotted path through nested objects
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a FieldValue> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = doc.get(first)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// A conjunction of clauses
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    /// Query matching every object
    pub fn all() -> Self {
        Self::default()
    }

    /// Equality query on one field
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::all().and_eq(field, value)
    }

    /// Query for a single object id
    pub fn by_id(object_id: &str) -> Self {
        Self::eq("objectId", object_id)
    }

    pub fn and(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn and_eq(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.and_field(field, Constraint::Eq(value.into()))
    }

    pub fn and_field(self, field: impl Into<String>, constraint: Constraint) -> Self {
        self.and(Clause::Field {
            field: field.into(),
            constraint,
        })
    }

    /// Restrict to objects whose ACL grants `access` to one of `identities`
    pub fn with_permission(self, access: Access, identities: Vec<String>) -> Self {
        self.and(Clause::Permission { access, identities })
    }

    /// Check if a document matches every clause
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|c| c.matches(doc))
    }

    /// Every field path referenced by the query, including nested `$or`/`$and`
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        for clause in &self.clauses {
            match clause {
                Clause::Field { field, .. } => fields.push(field.as_str()),
                Clause::Or(qs) | Clause::And(qs) => {
                    for q in qs {
                        fields.extend(q.referenced_fields());
                    }
                }
                Clause::RelatedTo { .. } | Clause::Permission { .. } => {}
            }
        }
        fields
    }
}
