//! # Sessions
//!
//! Session rows live in the `_Session` class. Each carries an opaque
//! revocable token, a pointer to its user and an expiry.

use chrono::{Duration, Utc};
use tracing::debug;

use super::context::UserRef;
use super::crypto::generate_session_token;
use crate::acl::{Acl, ACL_FIELD};
use crate::errors::{ApiError, ApiResult};
use crate::query::{Constraint, Query};
use crate::schema::{SESSION_CLASS, USER_CLASS};
use crate::store::StoreClient;
use crate::value::{new_object_id, Document, FieldValue, Pointer};

/// How a session came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Signup,
    Login,
    Create,
}

impl SessionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionAction::Signup => "signup",
            SessionAction::Login => "login",
            SessionAction::Create => "create",
        }
    }
}

/// Creates, resolves and revokes sessions
#[derive(Debug, Clone)]
pub struct SessionManager {
    store: StoreClient,
    session_length: Duration,
}

impl SessionManager {
    pub fn new(store: StoreClient, session_length: Duration) -> Self {
        Self {
            store,
            session_length,
        }
    }

    /// Build a session row for `user_id`; the caller persists it
    pub fn new_session(
        &self,
        user_id: &str,
        installation_id: Option<&str>,
        action: SessionAction,
        auth_provider: &str,
    ) -> Document {
        let now = Utc::now();

        let mut created_with = Document::new();
        created_with.insert("action".into(), FieldValue::string(action.as_str()));
        created_with.insert("authProvider".into(), FieldValue::string(auth_provider));

        let mut acl = Acl::new();
        acl.set_read(user_id, true).set_write(user_id, true);

        let mut session = Document::new();
        session.insert("objectId".into(), FieldValue::string(new_object_id()));
        session.insert("sessionToken".into(), FieldValue::string(generate_session_token()));
        session.insert(
            "user".into(),
            FieldValue::Pointer(Pointer::new(USER_CLASS, user_id)),
        );
        session.insert("createdWith".into(), FieldValue::Object(created_with));
        session.insert("restricted".into(), FieldValue::Bool(false));
        session.insert("expiresAt".into(), FieldValue::Date(now + self.session_length));
        if let Some(installation_id) = installation_id {
            session.insert("installationId".into(), FieldValue::string(installation_id));
        }
        session.insert("createdAt".into(), FieldValue::Date(now));
        session.insert("updatedAt".into(), FieldValue::Date(now));
        session.insert(ACL_FIELD.into(), acl.to_value());
        session
    }

    /// Create and persist a session, returning its token
    pub async fn create_session(
        &self,
        user_id: &str,
        installation_id: Option<&str>,
        action: SessionAction,
        auth_provider: &str,
    ) -> ApiResult<String> {
        let session = self.new_session(user_id, installation_id, action, auth_provider);
        let token = session
            .get("sessionToken")
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::internal("session without token"))?;
        self.store.create_object(SESSION_CLASS, session).await?;
        debug!(user_id, action = action.as_str(), "created session");
        Ok(token)
    }

    /// Resolve a token to its user. Unknown and expired tokens resolve to
    /// `None`.
    pub async fn lookup(&self, token: &str) -> ApiResult<Option<(UserRef, Option<String>)>> {
        let Some(session) = self
            .store
            .find_one(SESSION_CLASS, &Query::eq("sessionToken", token))
            .await?
        else {
            return Ok(None);
        };

        let expired = session
            .get("expiresAt")
            .and_then(FieldValue::as_date)
            .map(|expires_at| *expires_at <= Utc::now())
            .unwrap_or(false);
        if expired {
            debug!(reason = "session_expired", "session rejected");
            return Ok(None);
        }

        let Some(user_id) = session
            .get("user")
            .and_then(FieldValue::as_pointer)
            .map(|p| p.object_id.clone())
        else {
            return Ok(None);
        };
        let Some(user) = self
            .store
            .find_one(USER_CLASS, &Query::by_id(&user_id))
            .await?
        else {
            return Ok(None);
        };

        let installation_id = session
            .get("installationId")
            .and_then(FieldValue::as_str)
            .map(str::to_string);
        Ok(Some((UserRef::new(user_id, user), installation_id)))
    }

    /// Delete every session of a user except `keep_token`, returning the
    /// revoked tokens
    pub async fn revoke_user_sessions(
        &self,
        user_id: &str,
        keep_token: Option<&str>,
    ) -> ApiResult<Vec<String>> {
        let mut query = Query::eq("user", Pointer::new(USER_CLASS, user_id));
        if let Some(keep) = keep_token {
            query = query.and_field("sessionToken", Constraint::Ne(FieldValue::string(keep)));
        }

        let sessions = self
            .store
            .find(SESSION_CLASS, &query, &Default::default())
            .await?;
        let tokens = sessions
            .iter()
            .filter_map(|s| s.get("sessionToken").and_then(FieldValue::as_str))
            .map(str::to_string)
            .collect();
        self.store.delete_many(SESSION_CLASS, &query).await?;
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn setup() -> (SessionManager, StoreClient) {
        let store = StoreClient::new(
            Arc::new(crate::store::MemoryStore::new()),
            std::time::Duration::from_secs(1),
        );
        let mut user = Document::new();
        user.insert("objectId".into(), FieldValue::string("u1"));
        user.insert("username".into(), FieldValue::string("joe"));
        store.create_object(USER_CLASS, user).await.unwrap();
        (SessionManager::new(store.clone(), Duration::days(1)), store)
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let (sessions, _) = setup().await;
        let token = sessions
            .create_session("u1", Some("inst-1"), SessionAction::Login, "password")
            .await
            .unwrap();
        assert!(token.starts_with("r:"));

        let (user, installation_id) = sessions.lookup(&token).await.unwrap().unwrap();
        assert_eq!(user.object_id, "u1");
        assert_eq!(installation_id.as_deref(), Some("inst-1"));
        assert!(sessions.lookup("r:unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_not_resolved() {
        let (_, store) = setup().await;
        let sessions = SessionManager::new(store, Duration::seconds(-1));
        let token = sessions
            .create_session("u1", None, SessionAction::Login, "password")
            .await
            .unwrap();
        assert!(sessions.lookup(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_other_sessions() {
        let (sessions, store) = setup().await;
        let keep = sessions
            .create_session("u1", None, SessionAction::Login, "password")
            .await
            .unwrap();
        let other = sessions
            .create_session("u1", None, SessionAction::Login, "password")
            .await
            .unwrap();

        let revoked = sessions.revoke_user_sessions("u1", Some(&keep)).await.unwrap();
        assert_eq!(revoked, vec![other.clone()]);
        assert!(sessions.lookup(&keep).await.unwrap().is_some());
        assert!(sessions.lookup(&other).await.unwrap().is_none());
        assert_eq!(store.count(SESSION_CLASS, &Query::all()).await.unwrap(), 1);
    }
}
