//! # Authorization Context
//!
//! The identity a request acts as. Role membership is resolved lazily the
//! first time an ACL or class-level check needs it, then memoized for the
//! rest of the request.

use std::collections::HashSet;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::acl::{role_identity, PUBLIC};
use crate::errors::ApiResult;
use crate::query::{Constraint, FindOptions, Query};
use crate::schema::{join_class_name, ROLE_CLASS};
use crate::store::StoreClient;
use crate::value::{Document, FieldValue};

/// Upper bound on role graph expansion rounds
const MAX_ROLE_DEPTH: usize = 20;

/// Authenticated user attached to a request
#[derive(Debug, Clone)]
pub struct UserRef {
    pub object_id: String,
    pub object: Document,
}

impl UserRef {
    pub fn new(object_id: impl Into<String>, object: Document) -> Self {
        Self {
            object_id: object_id.into(),
            object,
        }
    }
}

/// Per-request authorization context
#[derive(Debug, Default)]
pub struct Auth {
    pub is_master: bool,
    pub user: Option<UserRef>,
    pub installation_id: Option<String>,
    pub session_token: Option<String>,
    roles: OnceCell<Vec<String>>,
}

impl Auth {
    /// Context that bypasses every ACL and class-level check
    pub fn master() -> Self {
        Self {
            is_master: true,
            ..Default::default()
        }
    }

    /// Client-key context without a user
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user: UserRef, session_token: Option<String>) -> Self {
        Self {
            user: Some(user),
            session_token,
            ..Default::default()
        }
    }

    pub fn with_installation_id(mut self, installation_id: Option<String>) -> Self {
        self.installation_id = installation_id;
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.object_id.as_str())
    }

    /// Role identities (`role:<name>`) of the user, resolved once per request
    pub async fn roles(&self, store: &StoreClient) -> ApiResult<&[String]> {
        let Some(user_id) = self.user_id() else {
            return Ok(&[]);
        };
        let roles = self
            .roles
            .get_or_try_init(|| resolve_roles(store, user_id))
            .await?;
        Ok(roles.as_slice())
    }

    /// Every identity an ACL may grant to: `*`, the user id and its roles
    pub async fn identities(&self, store: &StoreClient) -> ApiResult<Vec<String>> {
        let mut identities = vec![PUBLIC.to_string()];
        if let Some(user_id) = self.user_id() {
            identities.push(user_id.to_string());
            identities.extend(self.roles(store).await?.iter().cloned());
        }
        Ok(identities)
    }
}

async fn owning_ids(
    store: &StoreClient,
    join_class: &str,
    related: Vec<FieldValue>,
) -> ApiResult<Vec<String>> {
    let query = Query::all().and_field("relatedId", Constraint::In(related));
    let rows = store.find(join_class, &query, &FindOptions::default()).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("owningId").and_then(FieldValue::as_str))
        .map(str::to_string)
        .collect())
}

/// Walk the role graph: direct roles through `_Role.users`, then parents
/// through `_Role.roles` until no new role appears
async fn resolve_roles(store: &StoreClient, user_id: &str) -> ApiResult<Vec<String>> {
    let users_join = join_class_name("users", ROLE_CLASS);
    let roles_join = join_class_name("roles", ROLE_CLASS);

    let mut found: HashSet<String> = HashSet::new();
    let mut frontier = owning_ids(store, &users_join, vec![FieldValue::string(user_id)]).await?;

    for _ in 0..MAX_ROLE_DEPTH {
        frontier.retain(|id| found.insert(id.clone()));
        if frontier.is_empty() {
            break;
        }
        let related = frontier.drain(..).map(FieldValue::String).collect();
        frontier = owning_ids(store, &roles_join, related).await?;
    }

    if found.is_empty() {
        return Ok(Vec::new());
    }

    let ids = found.into_iter().map(FieldValue::String).collect();
    let role_docs = store
        .find(
            ROLE_CLASS,
            &Query::all().and_field("objectId", Constraint::In(ids)),
            &FindOptions::default(),
        )
        .await?;

    let mut roles: Vec<String> = role_docs
        .iter()
        .filter_map(|doc| doc.get("name").and_then(FieldValue::as_str))
        .map(role_identity)
        .collect();
    roles.sort();
    debug!(user_id, roles = ?roles, "resolved roles");
    Ok(roles)
}
