//! # Destroy
//!
//! Deletion is by query with the write ACL as one of its clauses, so the
//! permission check and the delete cannot be separated by a concurrent ACL
//! change. A delete that matches nothing succeeds without running the
//! after-delete hook, whether the object is missing or not writable.

use tracing::{debug, info};

use super::client_sdk::ClientSdk;
use super::RestService;
use crate::acl::Access;
use crate::auth::Auth;
use crate::errors::ApiResult;
use crate::query::Query;
use crate::schema::{validate_class_name, ClassOperation, SESSION_CLASS, USER_CLASS};
use crate::triggers::TriggerType;
use crate::value::FieldValue;

impl RestService {
    /// Delete one object
    pub async fn delete(
        &self,
        auth: &Auth,
        class_name: &str,
        object_id: &str,
        client: Option<&ClientSdk>,
    ) -> ApiResult<()> {
        validate_class_name(class_name)?;
        self.inner
            .schema
            .enforce(class_name, ClassOperation::Delete, auth)
            .await?;
        if let Some(client) = client {
            debug!(class_name, sdk = %client.sdk, version = %client.version, "delete");
        }

        let Some(original) = self.fetch_readable(auth, class_name, object_id).await? else {
            return Ok(());
        };
        let session_token = match class_name {
            SESSION_CLASS => original
                .get("sessionToken")
                .and_then(FieldValue::as_str)
                .map(str::to_string),
            _ => None,
        };
        if let Some(token) = &session_token {
            self.inner.session_cache.evict_token(token);
        }

        self.inner
            .triggers
            .run_before(
                TriggerType::BeforeDelete,
                class_name,
                auth,
                original.clone(),
                None,
            )
            .await?;

        let query = self
            .restrict(Query::by_id(object_id), auth, Access::Write)
            .await?;
        let deleted = self.inner.store.delete_many(class_name, &query).await?;
        if deleted == 0 {
            debug!(class_name, object_id, reason = "no_writable_match", "nothing deleted");
            return Ok(());
        }
        info!(class_name, object_id, "deleted object");

        // A lookup racing the delete may have cached the token again
        if let Some(token) = &session_token {
            self.inner.session_cache.evict_token(token);
        }
        if class_name == USER_CLASS {
            self.inner.session_cache.evict_user(object_id);
            let revoked = self
                .inner
                .sessions
                .revoke_user_sessions(object_id, None)
                .await?;
            for token in &revoked {
                self.inner.session_cache.evict_token(token);
            }
        }

        self.inner.triggers.run_after(
            TriggerType::AfterDelete,
            class_name,
            auth,
            original,
            None,
        );
        Ok(())
    }
}
