//! # Users
//!
//! Signup and update rules of `_User`, password login, logout and the
//! current-user lookup. Passwords are hashed off the async runtime.

use serde_json::Value;
use tracing::{debug, info};

use super::operations::{FieldOp, FieldOps};
use super::{CreateResponse, RestService};
use crate::acl::{Acl, ACL_FIELD, PUBLIC};
use crate::auth::crypto::{hash_password, verify_password};
use crate::auth::{Auth, ProviderIdentity, SessionAction};
use crate::errors::{ApiError, ApiResult};
use crate::query::{Clause, Constraint, Query};
use crate::store::{StoreUpdate, Updates};
use crate::schema::{SESSION_CLASS, USER_CLASS};
use crate::value::{document_to_json, new_object_id, Document, FieldValue};

const HASHED_PASSWORD: &str = "_hashed_password";

async fn hash_off_runtime(password: String) -> ApiResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::internal(format!("password hashing failed: {}", e)))?
}

async fn verify_off_runtime(password: String, hash: String) -> ApiResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("password verification failed: {}", e)))
}

fn invalid_login() -> ApiError {
    ApiError::not_found("Invalid username/password.")
}

/// Remove internal fields from a `_User` row. Other users' `authData` is
/// only visible to the master key.
pub(super) fn strip_user_internals(auth: &Auth, user: &mut Document) {
    let is_self = match (auth.user_id(), user.get("objectId").and_then(FieldValue::as_str)) {
        (Some(caller), Some(id)) => caller == id,
        _ => false,
    };
    user.retain(|field, _| {
        !field.starts_with('_') && field != "password" && field != "sessionToken"
    });
    if !auth.is_master && !is_self {
        user.shift_remove("authData");
    }
}

/// Attach the caller's own session token to their own `_User` row
pub(super) fn attach_session_token(auth: &Auth, user: &mut Document) {
    let Some(token) = auth.session_token.as_deref() else {
        return;
    };
    let is_self = match (auth.user_id(), user.get("objectId").and_then(FieldValue::as_str)) {
        (Some(caller), Some(id)) => caller == id,
        _ => false,
    };
    if is_self {
        user.insert("sessionToken".into(), FieldValue::string(token));
    }
}

impl RestService {
    /// Verify every provider in a signup's `authData`
    pub(super) async fn verify_auth_data(&self, ops: &FieldOps) -> ApiResult<Vec<ProviderIdentity>> {
        match ops.get("authData") {
            Some(FieldOp::Set(FieldValue::Object(auth_data))) => {
                self.inner.auth_data.verify_all(auth_data).await
            }
            Some(FieldOp::Set(FieldValue::Null)) | None => Ok(Vec::new()),
            Some(_) => Err(ApiError::InvalidJson("authData must be an object".to_string())),
        }
    }

    /// Log into the user already linked to one of `identities`, if any
    pub(super) async fn login_with_auth_data(
        &self,
        auth: &Auth,
        ops: &FieldOps,
        identities: &[ProviderIdentity],
    ) -> ApiResult<Option<CreateResponse>> {
        if identities.is_empty() {
            return Ok(None);
        }
        let linked = Query::all().and(Clause::Or(
            identities
                .iter()
                .map(|identity| Query::eq(identity.id_path(), identity.id.as_str()))
                .collect(),
        ));
        let mut users = self
            .inner
            .store
            .find(USER_CLASS, &linked, &Default::default())
            .await?;
        if users.len() > 1 {
            return Err(ApiError::DuplicateValue(
                "this auth is already used".to_string(),
            ));
        }
        let Some(mut user) = users.pop() else {
            return Ok(None);
        };
        let user_id = user
            .get("objectId")
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::internal("user without objectId"))?;

        // Merge newly supplied provider data into the stored links
        if let Some(FieldOp::Set(FieldValue::Object(supplied))) = ops.get("authData") {
            let mut merged = user
                .get("authData")
                .and_then(FieldValue::as_document)
                .cloned()
                .unwrap_or_default();
            for (provider, data) in supplied {
                merged.insert(provider.clone(), data.clone());
            }
            let mut updates = Updates::new();
            updates.insert("authData".into(), StoreUpdate::Set(FieldValue::Object(merged)));
            if let Some(updated) = self
                .inner
                .store
                .update_one(USER_CLASS, &Query::by_id(&user_id), updates)
                .await?
            {
                user = updated;
            }
        }

        let provider = identities
            .first()
            .map(|identity| identity.provider.as_str())
            .unwrap_or("password");
        let token = self
            .inner
            .sessions
            .create_session(
                &user_id,
                auth.installation_id.as_deref(),
                SessionAction::Login,
                provider,
            )
            .await?;
        info!(user_id = %user_id, provider, "logged in with auth data");

        let caller = Auth::for_user(
            crate::auth::UserRef::new(user_id.clone(), user.clone()),
            Some(token),
        );
        strip_user_internals(&caller, &mut user);
        attach_session_token(&caller, &mut user);

        Ok(Some(CreateResponse {
            created: false,
            location: self.location(USER_CLASS, &user_id),
            response: document_to_json(&user),
        }))
    }

    /// Apply signup rules to a new `_User` object
    pub(super) async fn prepare_new_user(
        &self,
        object_id: &str,
        user: &mut Document,
        has_auth_data: bool,
    ) -> ApiResult<()> {
        let username = user
            .get("username")
            .and_then(FieldValue::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let username = match username {
            Some(username) => username,
            None if has_auth_data => {
                let generated = new_object_id();
                user.insert("username".into(), FieldValue::string(&generated));
                generated
            }
            None => return Err(ApiError::UsernameMissing),
        };

        match user.shift_remove("password") {
            Some(FieldValue::String(password)) if !password.is_empty() => {
                let hashed = hash_off_runtime(password).await?;
                user.insert(HASHED_PASSWORD.into(), FieldValue::string(hashed));
            }
            None if has_auth_data => {}
            _ => return Err(ApiError::PasswordMissing),
        }

        self.check_user_unique(None, &username, user.get("email")).await?;

        if !user.contains_key(ACL_FIELD) {
            let mut acl = Acl::new();
            acl.set_read(PUBLIC, true);
            acl.set_read(object_id, true).set_write(object_id, true);
            user.insert(ACL_FIELD.into(), acl.to_value());
        }
        Ok(())
    }

    /// Apply update rules to `_User` operations. Returns whether the
    /// password changes.
    pub(super) async fn prepare_user_update(
        &self,
        object_id: &str,
        ops: &mut FieldOps,
    ) -> ApiResult<bool> {
        if let Some(op) = ops.get("username") {
            match op {
                FieldOp::Set(FieldValue::String(username)) if !username.is_empty() => {
                    self.check_user_unique(Some(object_id), username, None).await?;
                }
                _ => return Err(ApiError::UsernameMissing),
            }
        }
        if let Some(FieldOp::Set(email)) = ops.get("email") {
            if !email.is_null() {
                self.check_email_unique(Some(object_id), email).await?;
            }
        }

        let Some(op) = ops.shift_remove("password") else {
            return Ok(false);
        };
        match op {
            FieldOp::Set(FieldValue::String(password)) if !password.is_empty() => {
                let hashed = hash_off_runtime(password).await?;
                ops.insert(
                    HASHED_PASSWORD.into(),
                    FieldOp::Set(FieldValue::string(hashed)),
                );
                Ok(true)
            }
            _ => Err(ApiError::PasswordMissing),
        }
    }

    async fn check_user_unique(
        &self,
        except: Option<&str>,
        username: &str,
        email: Option<&FieldValue>,
    ) -> ApiResult<()> {
        let mut query = Query::eq("username", username);
        if let Some(id) = except {
            query = query.and_field("objectId", Constraint::Ne(FieldValue::string(id)));
        }
        if self.inner.store.count(USER_CLASS, &query).await? > 0 {
            debug!(username, reason = "username_taken", "signup rejected");
            return Err(ApiError::UsernameTaken);
        }
        match email {
            Some(email) if !email.is_null() => self.check_email_unique(except, email).await,
            _ => Ok(()),
        }
    }

    async fn check_email_unique(&self, except: Option<&str>, email: &FieldValue) -> ApiResult<()> {
        let mut query = Query::eq("email", email.clone());
        if let Some(id) = except {
            query = query.and_field("objectId", Constraint::Ne(FieldValue::string(id)));
        }
        if self.inner.store.count(USER_CLASS, &query).await? > 0 {
            return Err(ApiError::DuplicateValue(
                "Account already exists for this email address.".to_string(),
            ));
        }
        Ok(())
    }

    /// Log in with username and password, returning the user with a fresh
    /// `sessionToken`
    pub async fn login(
        &self,
        auth: &Auth,
        username: Option<&str>,
        password: Option<&str>,
    ) -> ApiResult<Value> {
        let username = username
            .filter(|u| !u.is_empty())
            .ok_or(ApiError::UsernameMissing)?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(ApiError::PasswordMissing)?;

        let Some(mut user) = self
            .inner
            .store
            .find_one(USER_CLASS, &Query::eq("username", username))
            .await?
        else {
            debug!(username, reason = "unknown_user", "login rejected");
            return Err(invalid_login());
        };

        // A locked account is rejected before paying for a hash verification
        self.inner.lockout.not_locked(username).await?;
        let correct = match user.get(HASHED_PASSWORD).and_then(FieldValue::as_str) {
            Some(hash) => verify_off_runtime(password.to_string(), hash.to_string()).await?,
            None => false,
        };
        self.inner
            .lockout
            .handle_login_attempt(username, correct)
            .await?;
        if !correct {
            debug!(username, reason = "wrong_password", "login rejected");
            return Err(invalid_login());
        }

        let user_id = user
            .get("objectId")
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::internal("user without objectId"))?;
        let token = self
            .inner
            .sessions
            .create_session(
                &user_id,
                auth.installation_id.as_deref(),
                SessionAction::Login,
                "password",
            )
            .await?;
        info!(user_id = %user_id, "user logged in");

        let caller = Auth::for_user(
            crate::auth::UserRef::new(user_id, user.clone()),
            Some(token),
        );
        strip_user_internals(&caller, &mut user);
        attach_session_token(&caller, &mut user);
        Ok(document_to_json(&user))
    }

    /// Delete the caller's session. Succeeds without a session.
    pub async fn logout(&self, auth: &Auth) -> ApiResult<()> {
        let Some(token) = auth.session_token.as_deref() else {
            return Ok(());
        };
        let Some(session) = self
            .inner
            .store
            .find_one(SESSION_CLASS, &Query::eq("sessionToken", token))
            .await?
        else {
            self.inner.session_cache.evict_token(token);
            return Ok(());
        };
        let session_id = session
            .get("objectId")
            .and_then(FieldValue::as_str)
            .ok_or_else(|| ApiError::internal("session without objectId"))?;
        self.delete(&Auth::master(), SESSION_CLASS, session_id, None)
            .await
    }

    /// The caller's own `_User` row with its session token
    pub async fn me(&self, auth: &Auth) -> ApiResult<Value> {
        let Some(user_id) = auth.user_id() else {
            return Err(ApiError::InvalidSessionToken);
        };
        let mut user = self
            .inner
            .store
            .find_one(USER_CLASS, &Query::by_id(user_id))
            .await?
            .ok_or(ApiError::InvalidSessionToken)?;
        strip_user_internals(auth, &mut user);
        attach_session_token(auth, &mut user);
        Ok(document_to_json(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, service};
    use super::*;
    use crate::auth::Credentials;
    use serde_json::json;

    async fn signup(rest: &RestService, username: &str, password: &str) -> Value {
        rest.create(
            &Auth::anonymous(),
            USER_CLASS,
            body(json!({"username": username, "password": password})),
            None,
        )
        .await
        .unwrap()
        .response
    }

    #[tokio::test]
    async fn test_signup_hashes_password_and_returns_token() {
        let rest = service();
        let response = signup(&rest, "joe", "secret").await;
        let token = response["sessionToken"].as_str().unwrap();
        assert!(token.starts_with("r:"));
        assert!(response.get("password").is_none());

        let stored = rest
            .store()
            .find_one(USER_CLASS, &Query::eq("username", "joe"))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.get("password").is_none());
        let hash = stored.get(HASHED_PASSWORD).and_then(FieldValue::as_str).unwrap();
        assert!(verify_password("secret", hash));
        assert!(stored.get(ACL_FIELD).is_some());
    }

    #[tokio::test]
    async fn test_signup_requires_username_and_password() {
        let rest = service();
        let err = rest
            .create(&Auth::anonymous(), USER_CLASS, body(json!({"password": "x"})), None)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::UsernameMissing);

        let err = rest
            .create(&Auth::anonymous(), USER_CLASS, body(json!({"username": "x"})), None)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::PasswordMissing);
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let rest = service();
        signup(&rest, "joe", "secret").await;
        let err = rest
            .create(
                &Auth::anonymous(),
                USER_CLASS,
                body(json!({"username": "joe", "password": "other"})),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::UsernameTaken);
    }

    #[tokio::test]
    async fn test_login_and_me() {
        let rest = service();
        signup(&rest, "joe", "secret").await;

        let err = rest
            .login(&Auth::anonymous(), Some("joe"), Some("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, invalid_login());

        let user = rest
            .login(&Auth::anonymous(), Some("joe"), Some("secret"))
            .await
            .unwrap();
        let token = user["sessionToken"].as_str().unwrap().to_string();
        assert!(user.get(HASHED_PASSWORD).is_none());

        let credentials = Credentials {
            app_id: Some("app".into()),
            client_key: Some("client".into()),
            session_token: Some(token.clone()),
            ..Default::default()
        };
        let auth = rest.authenticate(&credentials, false).await.unwrap();
        let me = rest.me(&auth).await.unwrap();
        assert_eq!(me["username"], "joe");
        assert_eq!(me["sessionToken"], token.as_str());

        rest.logout(&auth).await.unwrap();
        let err = rest.authenticate(&credentials, false).await.unwrap_err();
        assert_eq!(err, ApiError::InvalidSessionToken);
    }

    #[tokio::test]
    async fn test_login_requires_credentials() {
        let rest = service();
        assert_eq!(
            rest.login(&Auth::anonymous(), None, Some("x")).await.unwrap_err(),
            ApiError::UsernameMissing
        );
        assert_eq!(
            rest.login(&Auth::anonymous(), Some("joe"), None).await.unwrap_err(),
            ApiError::PasswordMissing
        );
        assert_eq!(
            rest.login(&Auth::anonymous(), Some("ghost"), Some("x"))
                .await
                .unwrap_err(),
            invalid_login()
        );
    }

    #[tokio::test]
    async fn test_anonymous_auth_data_signup_then_login() {
        let rest = service();
        let first = rest
            .create(
                &Auth::anonymous(),
                USER_CLASS,
                body(json!({"authData": {"anonymous": {"id": "device-1"}}})),
                None,
            )
            .await
            .unwrap();
        assert!(first.created);
        let user_id = first.response["objectId"].as_str().unwrap().to_string();

        let second = rest
            .create(
                &Auth::anonymous(),
                USER_CLASS,
                body(json!({"authData": {"anonymous": {"id": "device-1"}}})),
                None,
            )
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.response["objectId"], user_id.as_str());
        assert!(second.response["sessionToken"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_auth_provider() {
        let rest = service();
        let err = rest
            .create(
                &Auth::anonymous(),
                USER_CLASS,
                body(json!({"authData": {"myspace": {"id": "1"}}})),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::UnsupportedService("myspace".into()));
    }
}
