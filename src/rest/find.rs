//! # Find and Get
//!
//! The read ACL is added to the store query as a clause, so `skip` and
//! `limit` count only visible objects.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use super::client_sdk::ClientSdk;
use super::users::{attach_session_token, strip_user_internals};
use super::{FindResponse, RestService, RESERVED_FIELDS};
use crate::acl::Access;
use crate::auth::Auth;
use crate::errors::{ApiError, ApiResult};
use crate::query::{parse_where, Clause, Constraint, FindOptions, Query, QueryOptions};
use crate::schema::{join_class_name, validate_class_name, ClassOperation, USER_CLASS};
use crate::value::{document_to_json, Document, FieldValue, Pointer};

/// Relation lookups keyed by (owning class, owning id, relation key)
type RelatedIds = HashMap<(String, String, String), Vec<FieldValue>>;

impl RestService {
    /// Find objects matching a JSON `where` document
    pub async fn find(
        &self,
        auth: &Auth,
        class_name: &str,
        where_: Option<&Value>,
        options: QueryOptions,
        client: Option<&ClientSdk>,
    ) -> ApiResult<FindResponse> {
        validate_class_name(class_name)?;
        let query = match where_ {
            Some(where_) => parse_where(where_)?,
            None => Query::all(),
        };
        self.inner
            .schema
            .enforce(class_name, ClassOperation::Find, auth)
            .await?;
        if let Some(client) = client {
            debug!(class_name, sdk = %client.sdk, version = %client.version, "find");
        }
        self.run_find(auth, class_name, query, &options).await
    }

    /// Fetch one object by id
    pub async fn get(
        &self,
        auth: &Auth,
        class_name: &str,
        object_id: &str,
        options: QueryOptions,
        client: Option<&ClientSdk>,
    ) -> ApiResult<Value> {
        validate_class_name(class_name)?;
        self.inner
            .schema
            .enforce(class_name, ClassOperation::Get, auth)
            .await?;
        if let Some(client) = client {
            debug!(class_name, sdk = %client.sdk, version = %client.version, "get");
        }

        let options = QueryOptions {
            skip: 0,
            limit: Some(1),
            order: Vec::new(),
            count: false,
            ..options
        };
        let response = self
            .run_find(auth, class_name, Query::by_id(object_id), &options)
            .await?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::not_found("Object not found."))
    }

    /// Fetch an object the caller may read. Absent and hidden objects are
    /// both `None`.
    pub(super) async fn fetch_readable(
        &self,
        auth: &Auth,
        class_name: &str,
        object_id: &str,
    ) -> ApiResult<Option<Document>> {
        let Some(doc) = self
            .inner
            .store
            .find_one(class_name, &Query::by_id(object_id))
            .await?
        else {
            debug!(class_name, object_id, reason = "absent", "object not found");
            return Ok(None);
        };
        if !self.permits(auth, &doc, Access::Read).await? {
            debug!(class_name, object_id, reason = "acl_read", "object not found");
            return Ok(None);
        }
        Ok(Some(doc))
    }

    async fn run_find(
        &self,
        auth: &Auth,
        class_name: &str,
        query: Query,
        options: &QueryOptions,
    ) -> ApiResult<FindResponse> {
        if !auth.is_master {
            let ordered = options.order.iter().map(|o| o.field.as_str());
            for field in query.referenced_fields().into_iter().chain(ordered) {
                if field.starts_with('_') {
                    return Err(ApiError::invalid_key(format!("Invalid key name: {}", field)));
                }
            }
        }

        let query = self.resolve_related(query).await?;
        let query = self.restrict(query, auth, Access::Read).await?;

        let count = if options.count {
            Some(self.inner.store.count(class_name, &query).await?)
        } else {
            None
        };

        let limit = options.limit.unwrap_or(self.inner.config.default_limit);
        let mut docs = if limit == 0 {
            Vec::new()
        } else {
            let find_options = FindOptions {
                skip: options.skip,
                limit: Some(limit),
                order: options.order.clone(),
            };
            self.inner
                .store
                .find(class_name, &query, &find_options)
                .await?
        };

        if !options.include.is_empty() {
            self.expand_includes(auth, &mut docs, &options.include)
                .await?;
        }

        let results = docs
            .into_iter()
            .map(|mut doc| {
                if class_name == USER_CLASS {
                    strip_user_internals(auth, &mut doc);
                }
                if let Some(keys) = &options.keys {
                    project(&mut doc, keys);
                }
                if class_name == USER_CLASS {
                    attach_session_token(auth, &mut doc);
                }
                document_to_json(&doc)
            })
            .collect();

        Ok(FindResponse { results, count })
    }

    /// Replace `$relatedTo` clauses with `objectId` constraints read from the
    /// relation's join rows
    async fn resolve_related(&self, query: Query) -> ApiResult<Query> {
        let mut wanted = Vec::new();
        collect_related(&query, &mut wanted);
        if wanted.is_empty() {
            return Ok(query);
        }

        let mut related = RelatedIds::new();
        for (object, key) in wanted {
            let join_class = join_class_name(&key, &object.class_name);
            let rows = self
                .inner
                .store
                .find(
                    &join_class,
                    &Query::eq("owningId", object.object_id.as_str()),
                    &FindOptions::default(),
                )
                .await?;
            let ids = rows
                .iter()
                .filter_map(|row| row.get("relatedId").cloned())
                .collect();
            related.insert((object.class_name, object.object_id, key), ids);
        }
        Ok(rewrite_related(query, &related))
    }
}

fn collect_related(query: &Query, out: &mut Vec<(Pointer, String)>) {
    for clause in &query.clauses {
        match clause {
            Clause::RelatedTo { object, key } => {
                let entry = (object.clone(), key.clone());
                if !out.contains(&entry) {
                    out.push(entry);
                }
            }
            Clause::Or(queries) | Clause::And(queries) => {
                for q in queries {
                    collect_related(q, out);
                }
            }
            _ => {}
        }
    }
}

fn rewrite_related(query: Query, related: &RelatedIds) -> Query {
    let clauses = query
        .clauses
        .into_iter()
        .map(|clause| match clause {
            Clause::RelatedTo { object, key } => {
                let ids = related
                    .get(&(object.class_name, object.object_id, key))
                    .cloned()
                    .unwrap_or_default();
                Clause::Field {
                    field: "objectId".to_string(),
                    constraint: Constraint::In(ids),
                }
            }
            Clause::Or(queries) => Clause::Or(
                queries
                    .into_iter()
                    .map(|q| rewrite_related(q, related))
                    .collect(),
            ),
            Clause::And(queries) => Clause::And(
                queries
                    .into_iter()
                    .map(|q| rewrite_related(q, related))
                    .collect(),
            ),
            other => other,
        })
        .collect();
    Query { clauses }
}

/// Keep the listed top-level keys plus the server fields
fn project(doc: &mut Document, keys: &[String]) {
    doc.retain(|field, _| {
        RESERVED_FIELDS.contains(&field.as_str())
            || keys
                .iter()
                .any(|key| key.split('.').next() == Some(field.as_str()))
    });
}
