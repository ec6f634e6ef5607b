//! # Include Expansion
//!
//! Replaces pointers on the given paths with the objects they reference.
//! Paths are expanded shortest prefix first, so `owner.team` first turns
//! `owner` into an object and then resolves `team` inside it. Each path is
//! cut at the configured depth, which also bounds cyclic pointers.

use std::collections::HashMap;

use super::users::strip_user_internals;
use super::RestService;
use crate::acl::Access;
use crate::auth::Auth;
use crate::errors::ApiResult;
use crate::query::{Constraint, FindOptions, Query};
use crate::schema::{ClassOperation, USER_CLASS};
use crate::value::{format_date, Document, FieldValue, Pointer};

impl RestService {
    pub(super) async fn expand_includes(
        &self,
        auth: &Auth,
        docs: &mut [Document],
        paths: &[Vec<String>],
    ) -> ApiResult<()> {
        let max_depth = self.inner.config.max_include_depth;
        let mut prefixes: Vec<Vec<String>> = Vec::new();
        for path in paths {
            let path = &path[..path.len().min(max_depth)];
            for end in 1..=path.len() {
                let prefix = path[..end].to_vec();
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
        }
        prefixes.sort_by_key(Vec::len);

        for prefix in &prefixes {
            let mut pointers = Vec::new();
            for doc in docs.iter() {
                collect_pointers(doc, prefix, &mut pointers);
            }
            if pointers.is_empty() {
                continue;
            }
            let fetched = self.fetch_pointed(auth, &pointers).await?;
            for doc in docs.iter_mut() {
                replace_pointers(doc, prefix, &fetched);
            }
        }
        Ok(())
    }

    /// Load the readable targets of `pointers`. Unreadable targets are left
    /// out and stay pointers.
    async fn fetch_pointed(
        &self,
        auth: &Auth,
        pointers: &[Pointer],
    ) -> ApiResult<HashMap<Pointer, Document>> {
        let mut by_class: HashMap<&str, Vec<FieldValue>> = HashMap::new();
        for pointer in pointers {
            by_class
                .entry(pointer.class_name.as_str())
                .or_default()
                .push(FieldValue::string(&pointer.object_id));
        }

        let mut fetched = HashMap::new();
        for (class_name, ids) in by_class {
            if self
                .inner
                .schema
                .enforce(class_name, ClassOperation::Get, auth)
                .await
                .is_err()
            {
                continue;
            }
            let query = Query::all().and_field("objectId", Constraint::In(ids));
            let query = self.restrict(query, auth, Access::Read).await?;
            let docs = self
                .inner
                .store
                .find(class_name, &query, &FindOptions::default())
                .await?;
            for mut doc in docs {
                let Some(object_id) = doc
                    .get("objectId")
                    .and_then(FieldValue::as_str)
                    .map(str::to_string)
                else {
                    continue;
                };
                if class_name == USER_CLASS {
                    strip_user_internals(auth, &mut doc);
                }
                fetched.insert(Pointer::new(class_name, object_id), as_included(class_name, doc));
            }
        }
        Ok(fetched)
    }
}

/// Tag an object for nesting the way the wire format marks full objects
fn as_included(class_name: &str, doc: Document) -> Document {
    let mut included = Document::with_capacity(doc.len() + 2);
    included.insert("__type".into(), FieldValue::string("Object"));
    included.insert("className".into(), FieldValue::string(class_name));
    for (field, value) in doc {
        let value = match (field.as_str(), value) {
            ("createdAt" | "updatedAt", FieldValue::Date(dt)) => FieldValue::string(format_date(&dt)),
            (_, value) => value,
        };
        included.insert(field, value);
    }
    included
}

fn collect_pointers(doc: &Document, path: &[String], out: &mut Vec<Pointer>) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if let Some(value) = doc.get(first) {
        collect_in_value(value, rest, out);
    }
}

fn collect_in_value(value: &FieldValue, rest: &[String], out: &mut Vec<Pointer>) {
    match value {
        FieldValue::Pointer(pointer) if rest.is_empty() => {
            if !out.contains(pointer) {
                out.push(pointer.clone());
            }
        }
        FieldValue::Object(doc) if !rest.is_empty() => collect_pointers(doc, rest, out),
        FieldValue::Array(items) => {
            for item in items {
                collect_in_value(item, rest, out);
            }
        }
        _ => {}
    }
}

fn replace_pointers(doc: &mut Document, path: &[String], fetched: &HashMap<Pointer, Document>) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if let Some(value) = doc.get_mut(first) {
        replace_in_value(value, rest, fetched);
    }
}

fn replace_in_value(value: &mut FieldValue, rest: &[String], fetched: &HashMap<Pointer, Document>) {
    let replacement = match &*value {
        FieldValue::Pointer(pointer) if rest.is_empty() => fetched.get(pointer).cloned(),
        _ => None,
    };
    if let Some(object) = replacement {
        *value = FieldValue::Object(object);
        return;
    }
    match value {
        FieldValue::Object(doc) if !rest.is_empty() => replace_pointers(doc, rest, fetched),
        FieldValue::Array(items) => {
            for item in items {
                replace_in_value(item, rest, fetched);
            }
        }
        _ => {}
    }
}
