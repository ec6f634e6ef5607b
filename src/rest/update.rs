//! # Update

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::client_sdk::ClientSdk;
use super::create::schema_fields;
use super::operations::{
    add_hook_changes, hook_changes, parse_body, to_updates, validate_ops, FieldOp, FieldOps,
};
use super::{RestService, RESERVED_FIELDS};
use crate::acl::Access;
use crate::auth::Auth;
use crate::errors::{ApiError, ApiResult};
use crate::query::Query;
use crate::schema::{
    validate_class_name, ClassOperation, ROLE_CLASS, SESSION_CLASS, USER_CLASS,
};
use crate::store::{apply_updates, StoreUpdate};
use crate::triggers::TriggerType;
use crate::value::{format_date, Document, FieldValue};

/// Session fields that bind a token to its user; only the master key may
/// change them
const SESSION_BOUND_FIELDS: &[&str] = &[
    "user",
    "sessionToken",
    "expiresAt",
    "createdWith",
    "installationId",
    "restricted",
];

/// Reject updates that would change who an existing session or role refers to
fn protect_identity_fields(auth: &Auth, class_name: &str, ops: &FieldOps) -> ApiResult<()> {
    match class_name {
        SESSION_CLASS if !auth.is_master => {
            if let Some(field) = ops
                .keys()
                .find(|field| SESSION_BOUND_FIELDS.contains(&field.as_str()))
            {
                debug!(class_name, field = %field, reason = "session_bound_field", "update denied");
                return Err(ApiError::invalid_key(format!(
                    "Cannot modify {} on a session.",
                    field
                )));
            }
            Ok(())
        }
        ROLE_CLASS if ops.contains_key("name") => {
            debug!(class_name, reason = "role_rename", "update denied");
            Err(ApiError::forbidden(
                "A role's name can only be set before it has been saved.",
            ))
        }
        _ => Ok(()),
    }
}

impl RestService {
    /// Apply a partial update to one object and return `updatedAt` plus the
    /// server-computed fields
    pub async fn update(
        &self,
        auth: &Auth,
        class_name: &str,
        object_id: &str,
        body: Map<String, Value>,
        client: Option<&ClientSdk>,
    ) -> ApiResult<Value> {
        validate_class_name(class_name)?;
        let mut ops = parse_body(&body)?;
        ops.retain(|field, _| !RESERVED_FIELDS.contains(&field.as_str()));
        validate_ops(&ops)?;
        protect_identity_fields(auth, class_name, &ops)?;

        let original = self
            .fetch_readable(auth, class_name, object_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Object not found."))?;
        if !self.permits(auth, &original, Access::Write).await? {
            debug!(class_name, object_id, reason = "acl_write", "update denied");
            return Err(ApiError::forbidden(
                "This user does not have write access to this object.",
            ));
        }
        self.inner
            .schema
            .enforce(class_name, ClassOperation::Update, auth)
            .await?;

        // Operators are checked against the stored values before any hook
        // sees the result
        let mut proposed = original.clone();
        apply_updates(&mut proposed, &to_updates(&ops))?;

        let mut changed = Vec::new();
        let mut removed = Vec::new();
        if self.inner.triggers.has(TriggerType::BeforeSave, class_name) {
            let returned = self
                .inner
                .triggers
                .run_before(
                    TriggerType::BeforeSave,
                    class_name,
                    auth,
                    proposed.clone(),
                    Some(original.clone()),
                )
                .await?;
            (changed, removed) = hook_changes(&proposed, &returned);
            changed.retain(|f| !RESERVED_FIELDS.contains(&f.as_str()));
            removed.retain(|f| !RESERVED_FIELDS.contains(&f.as_str()));
            for field in &changed {
                if let Some(value) = returned.get(field) {
                    ops.insert(field.clone(), FieldOp::Set(value.clone()));
                }
            }
            for field in &removed {
                ops.insert(field.clone(), FieldOp::Delete);
            }
        }

        let password_changed = if class_name == USER_CLASS {
            self.prepare_user_update(object_id, &mut ops).await?
        } else {
            false
        };

        let declared: Document = ops
            .iter()
            .filter_map(|(field, op)| match op {
                FieldOp::Set(value) => Some((field.clone(), value.clone())),
                _ => None,
            })
            .collect();
        let mut fields = schema_fields(&declared, &ops);
        fields.extend(ops.iter().filter(|(_, op)| !op.is_relation()).filter_map(
            |(field, op)| match op {
                FieldOp::Set(_) | FieldOp::Delete => None,
                _ => op.implied_type().map(|t| (field.clone(), t)),
            },
        ));
        self.inner
            .schema
            .ensure_fields(class_name, &fields, auth)
            .await?;

        let now = Utc::now();
        let mut updates = to_updates(&ops);
        updates.insert("updatedAt".into(), StoreUpdate::Set(FieldValue::Date(now)));

        let query = self
            .restrict(Query::by_id(object_id), auth, Access::Write)
            .await?;
        let updated = self
            .inner
            .store
            .update_one(class_name, &query, updates)
            .await?
            .ok_or_else(|| ApiError::not_found("Object not found."))?;
        self.write_relations(class_name, object_id, &ops).await?;
        info!(class_name, object_id, "updated object");

        match class_name {
            USER_CLASS => {
                self.inner.session_cache.evict_user(object_id);
                if password_changed {
                    let keep = auth
                        .session_token
                        .as_deref()
                        .filter(|_| auth.user_id() == Some(object_id));
                    let revoked = self
                        .inner
                        .sessions
                        .revoke_user_sessions(object_id, keep)
                        .await?;
                    for token in &revoked {
                        self.inner.session_cache.evict_token(token);
                    }
                    info!(user_id = object_id, revoked = revoked.len(), "password changed");
                }
            }
            SESSION_CLASS => {
                if let Some(token) = original.get("sessionToken").and_then(FieldValue::as_str) {
                    self.inner.session_cache.evict_token(token);
                }
            }
            _ => {}
        }

        let mut response = Map::new();
        response.insert("updatedAt".into(), Value::String(format_date(&now)));
        for (field, op) in &ops {
            if op.is_server_computed() {
                if let Some(value) = updated.get(field) {
                    response.insert(field.clone(), value.to_json());
                }
            }
        }
        add_hook_changes(&mut response, &changed, &removed, &updated, client);

        self.inner.triggers.run_after(
            TriggerType::AfterSave,
            class_name,
            auth,
            updated,
            Some(original),
        );

        Ok(Value::Object(response))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, service};
    use super::*;
    use crate::auth::{Credentials, UserRef};
    use crate::value::Document;
    use serde_json::json;

    async fn create(rest: &RestService, auth: &Auth, class_name: &str, value: Value) -> String {
        rest.create(auth, class_name, body(value), None)
            .await
            .unwrap()
            .response["objectId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn user(id: &str) -> Auth {
        Auth::for_user(UserRef::new(id, Document::new()), None)
    }

    #[tokio::test]
    async fn test_increment_returns_new_value() {
        let rest = service();
        let id = create(&rest, &Auth::master(), "Game", json!({"score": 5})).await;

        let response = rest
            .update(
                &Auth::master(),
                "Game",
                &id,
                body(json!({"score": {"__op": "Increment", "amount": 2}})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response["score"], 7);
        assert!(response["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_increment_on_string_is_incorrect_type() {
        let rest = service();
        let id = create(&rest, &Auth::master(), "Game", json!({"name": "x"})).await;
        let err = rest
            .update(
                &Auth::master(),
                "Game",
                &id,
                body(json!({"name": {"__op": "Increment", "amount": 1}})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IncorrectType(_)));
    }

    #[tokio::test]
    async fn test_reserved_fields_silently_dropped() {
        let rest = service();
        let id = create(&rest, &Auth::master(), "Game", json!({"score": 1})).await;
        rest.update(
            &Auth::master(),
            "Game",
            &id,
            body(json!({"objectId": "other", "score": 2})),
            None,
        )
        .await
        .unwrap();

        let stored = rest
            .store()
            .find_one("Game", &Query::by_id(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("score"), Some(&FieldValue::from_i64(2)));
    }

    #[tokio::test]
    async fn test_acl_controls_update() {
        let rest = service();
        let hidden = create(
            &rest,
            &Auth::master(),
            "Note",
            json!({"ACL": {"u1": {"read": true, "write": true}}}),
        )
        .await;
        let read_only = create(
            &rest,
            &Auth::master(),
            "Note",
            json!({"ACL": {"*": {"read": true}}}),
        )
        .await;

        let err = rest
            .update(&user("u2"), "Note", &hidden, body(json!({"a": 1})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ObjectNotFound(_)));

        let err = rest
            .update(&user("u2"), "Note", &read_only, body(json!({"a": 1})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OperationForbidden(_)));

        rest.update(&user("u1"), "Note", &hidden, body(json!({"a": 1})), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_role_name_is_fixed_after_create() {
        let rest = service();
        let id = create(&rest, &Auth::master(), ROLE_CLASS, json!({"name": "editors"})).await;

        let err = rest
            .update(&Auth::master(), ROLE_CLASS, &id, body(json!({"name": "admin"})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OperationForbidden(_)));

        rest.update(&Auth::master(), ROLE_CLASS, &id, body(json!({"label": "Editors"})), None)
            .await
            .unwrap();
        let stored = rest
            .store()
            .find_one(ROLE_CLASS, &Query::by_id(&id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("name").and_then(FieldValue::as_str), Some("editors"));
    }

    #[test]
    fn test_session_bound_fields_need_master() {
        let expires = json!({"__type": "Date", "iso": "2099-01-01T00:00:00.000Z"});
        let ops = parse_body(&body(json!({ "expiresAt": expires }))).unwrap();
        let err = protect_identity_fields(&user("u1"), SESSION_CLASS, &ops).unwrap_err();
        assert_eq!(err, ApiError::invalid_key("Cannot modify expiresAt on a session."));
        assert!(protect_identity_fields(&Auth::master(), SESSION_CLASS, &ops).is_ok());

        let custom = parse_body(&body(json!({"deviceName": "phone"}))).unwrap();
        assert!(protect_identity_fields(&user("u1"), SESSION_CLASS, &custom).is_ok());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let rest = service();
        let err = rest
            .update(&Auth::master(), "Game", "nope", body(json!({"a": 1})), None)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::not_found("Object not found."));
    }

    #[tokio::test]
    async fn test_password_change_revokes_other_sessions() {
        let rest = service();
        let signup = rest
            .create(
                &Auth::anonymous(),
                USER_CLASS,
                body(json!({"username": "joe", "password": "one"})),
                None,
            )
            .await
            .unwrap()
            .response;
        let user_id = signup["objectId"].as_str().unwrap().to_string();
        let first_token = signup["sessionToken"].as_str().unwrap().to_string();
        let second = rest
            .login(&Auth::anonymous(), Some("joe"), Some("one"))
            .await
            .unwrap();
        let second_token = second["sessionToken"].as_str().unwrap().to_string();

        let credentials = |token: &str| Credentials {
            app_id: Some("app".into()),
            client_key: Some("client".into()),
            session_token: Some(token.to_string()),
            ..Default::default()
        };
        let auth = rest
            .authenticate(&credentials(&second_token), false)
            .await
            .unwrap();
        rest.authenticate(&credentials(&first_token), false)
            .await
            .unwrap();

        rest.update(&auth, USER_CLASS, &user_id, body(json!({"password": "two"})), None)
            .await
            .unwrap();

        assert!(rest
            .authenticate(&credentials(&second_token), false)
            .await
            .is_ok());
        assert_eq!(
            rest.authenticate(&credentials(&first_token), false)
                .await
                .unwrap_err(),
            ApiError::InvalidSessionToken
        );
        assert!(rest
            .login(&Auth::anonymous(), Some("joe"), Some("two"))
            .await
            .is_ok());
    }
}
