//! # Create

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::client_sdk::ClientSdk;
use super::operations::{add_hook_changes, hook_changes, parse_body, validate_ops, FieldOp, FieldOps};
use super::{CreateResponse, RestService, RESERVED_FIELDS};
use crate::auth::{Auth, SessionAction};
use crate::errors::{ApiError, ApiResult};
use crate::query::Query;
use crate::schema::{
    join_class_name, validate_class_name, ClassOperation, FieldType, ROLE_CLASS, SESSION_CLASS,
    USER_CLASS,
};
use crate::triggers::TriggerType;
use crate::value::{format_date, new_object_id, Document, FieldValue};

impl RestService {
    /// Create an object from a client body
    pub async fn create(
        &self,
        auth: &Auth,
        class_name: &str,
        body: Map<String, Value>,
        client: Option<&ClientSdk>,
    ) -> ApiResult<CreateResponse> {
        validate_class_name(class_name)?;
        for field in RESERVED_FIELDS {
            if body.contains_key(field) {
                return Err(ApiError::invalid_key(format!(
                    "{} is an invalid field name.",
                    field
                )));
            }
        }
        let ops = parse_body(&body)?;
        validate_ops(&ops)?;

        if class_name == SESSION_CLASS && !auth.is_master {
            debug!(class_name, reason = "session_create", "operation denied");
            return Err(ApiError::forbidden(
                "Sessions can only be created by logging in or signing up.",
            ));
        }
        self.inner
            .schema
            .enforce(class_name, ClassOperation::Create, auth)
            .await?;

        let mut auth_provider = "password".to_string();
        if class_name == USER_CLASS {
            let identities = self.verify_auth_data(&ops).await?;
            if let Some(response) = self.login_with_auth_data(auth, &ops, &identities).await? {
                return Ok(response);
            }
            if let Some(identity) = identities.first() {
                auth_provider = identity.provider.clone();
            }
        }

        let given: Document = ops
            .iter()
            .filter_map(|(field, op)| op.initial_value().map(|v| (field.clone(), v)))
            .collect();
        let mut object = self
            .inner
            .triggers
            .run_before(TriggerType::BeforeSave, class_name, auth, given.clone(), None)
            .await?;
        object.retain(|field, value| !RESERVED_FIELDS.contains(&field.as_str()) && !value.is_null());
        let (changed, removed) = hook_changes(&given, &object);

        if class_name == ROLE_CLASS {
            self.check_role_name(&object).await?;
        }

        let object_id = new_object_id();
        if class_name == USER_CLASS {
            self.prepare_new_user(&object_id, &mut object, auth_provider != "password")
                .await?;
        }

        let fields = schema_fields(&object, &ops);
        self.inner
            .schema
            .ensure_fields(class_name, &fields, auth)
            .await?;

        let now = Utc::now();
        object.shift_insert(0, "objectId".into(), FieldValue::string(&object_id));
        object.insert("createdAt".into(), FieldValue::Date(now));
        object.insert("updatedAt".into(), FieldValue::Date(now));

        self.inner
            .store
            .create_object(class_name, object.clone())
            .await?;
        self.write_relations(class_name, &object_id, &ops).await?;
        info!(class_name, object_id = %object_id, "created object");

        let mut response = Map::new();
        response.insert("objectId".into(), Value::String(object_id.clone()));
        response.insert("createdAt".into(), Value::String(format_date(&now)));
        add_hook_changes(&mut response, &changed, &removed, &object, client);

        if class_name == USER_CLASS {
            let token = self
                .inner
                .sessions
                .create_session(
                    &object_id,
                    auth.installation_id.as_deref(),
                    SessionAction::Signup,
                    &auth_provider,
                )
                .await?;
            response.insert("sessionToken".into(), Value::String(token));
        }

        self.inner
            .triggers
            .run_after(TriggerType::AfterSave, class_name, auth, object, None);

        Ok(CreateResponse {
            created: true,
            location: self.location(class_name, &object_id),
            response: Value::Object(response),
        })
    }

    /// Persist `AddRelation`/`RemoveRelation` operations as join rows
    pub(super) async fn write_relations(
        &self,
        class_name: &str,
        object_id: &str,
        ops: &FieldOps,
    ) -> ApiResult<()> {
        for (field, op) in ops {
            let join_class = join_class_name(field, class_name);
            match op {
                FieldOp::AddRelation(pointers) => {
                    for pointer in pointers {
                        let row_query = Query::eq("owningId", object_id)
                            .and_eq("relatedId", pointer.object_id.as_str());
                        if self.inner.store.count(&join_class, &row_query).await? > 0 {
                            continue;
                        }
                        let mut row = Document::new();
                        row.insert("objectId".into(), FieldValue::string(new_object_id()));
                        row.insert("owningId".into(), FieldValue::string(object_id));
                        row.insert("relatedId".into(), FieldValue::string(&pointer.object_id));
                        self.inner.store.create_object(&join_class, row).await?;
                    }
                }
                FieldOp::RemoveRelation(pointers) => {
                    let related = pointers
                        .iter()
                        .map(|p| FieldValue::string(&p.object_id))
                        .collect();
                    let rows = Query::eq("owningId", object_id)
                        .and_field("relatedId", crate::query::Constraint::In(related));
                    self.inner.store.delete_many(&join_class, &rows).await?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Field types a write declares: the stored values plus relation targets
pub(super) fn schema_fields(object: &Document, ops: &FieldOps) -> Vec<(String, FieldType)> {
    let mut fields: Vec<(String, FieldType)> = object
        .iter()
        .filter_map(|(field, value)| FieldType::infer(value).map(|t| (field.clone(), t)))
        .collect();
    fields.extend(
        ops.iter()
            .filter(|(_, op)| op.is_relation())
            .filter_map(|(field, op)| op.implied_type().map(|t| (field.clone(), t))),
    );
    fields
}

/// Role names become `role:<name>` ACL identities
fn is_valid_role_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

impl RestService {
    /// A new role needs a well-formed name no other role holds
    async fn check_role_name(&self, object: &Document) -> ApiResult<()> {
        let name = match object.get("name") {
            None => return Err(ApiError::invalid_key("Roles must have a name.")),
            Some(value) => value
                .as_str()
                .ok_or_else(|| ApiError::incorrect_type("A role's name must be a String."))?,
        };
        if !is_valid_role_name(name) {
            return Err(ApiError::invalid_key(
                "A role's name can only contain alphanumeric characters, _, -, and spaces.",
            ));
        }
        let taken = self
            .inner
            .store
            .count(ROLE_CLASS, &Query::eq("name", name))
            .await?;
        if taken > 0 {
            debug!(role = name, reason = "duplicate_role", "create denied");
            return Err(ApiError::DuplicateValue(format!(
                "Cannot add duplicate role name of {}",
                name
            )));
        }
        Ok(())
    }
}
