//! # Schema Registry
//!
//! Read-mostly cache of class schemas over the store. Reads are served from
//! the cache; a write that introduces a new class or field takes the class's
//! own lock, re-reads the stored schema and merges into it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::types::{
    validate_class_name, validate_field_name, ClassLevelPermissions, ClassOperation, ClassSchema,
    FieldType, SYSTEM_CLASSES,
};
use crate::auth::Auth;
use crate::errors::{ApiError, ApiResult};
use crate::locks::KeyedLocks;
use crate::store::StoreClient;

/// Shared schema registry
#[derive(Debug)]
pub struct SchemaRegistry {
    store: StoreClient,
    cache: RwLock<HashMap<String, Arc<ClassSchema>>>,
    locks: KeyedLocks,
    allow_client_class_creation: bool,
}

impl SchemaRegistry {
    pub fn new(store: StoreClient, allow_client_class_creation: bool) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            allow_client_class_creation,
        }
    }

    fn cached(&self, class_name: &str) -> ApiResult<Option<Arc<ClassSchema>>> {
        let cache = self
            .cache
            .read()
            .map_err(|_| ApiError::internal("Lock poisoned"))?;
        Ok(cache.get(class_name).cloned())
    }

    fn remember(&self, schema: ClassSchema) -> ApiResult<Arc<ClassSchema>> {
        let schema = Arc::new(schema);
        let mut cache = self
            .cache
            .write()
            .map_err(|_| ApiError::internal("Lock poisoned"))?;
        cache.insert(schema.class_name.clone(), schema.clone());
        Ok(schema)
    }

    /// Schema of a class. System classes always have one.
    pub async fn get(&self, class_name: &str) -> ApiResult<Option<Arc<ClassSchema>>> {
        if let Some(schema) = self.cached(class_name)? {
            return Ok(Some(schema));
        }
        if let Some(schema) = self.store.get_class(class_name).await? {
            return self.remember(schema).map(Some);
        }
        if SYSTEM_CLASSES.contains(&class_name) {
            return Ok(Some(Arc::new(ClassSchema::new(class_name))));
        }
        Ok(None)
    }

    /// Drop a cached schema so the next read goes to the store
    pub fn invalidate(&self, class_name: &str) -> ApiResult<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| ApiError::internal("Lock poisoned"))?;
        cache.remove(class_name);
        Ok(())
    }

    /// Enforce the class-level permission for `op`. Classes without a schema
    /// are unrestricted.
    pub async fn enforce(&self, class_name: &str, op: ClassOperation, auth: &Auth) -> ApiResult<()> {
        if auth.is_master {
            return Ok(());
        }
        let Some(schema) = self.get(class_name).await? else {
            return Ok(());
        };
        self.check_permission(&schema.class_level_permissions, class_name, op, auth)
            .await
    }

    async fn check_permission(
        &self,
        clp: &ClassLevelPermissions,
        class_name: &str,
        op: ClassOperation,
        auth: &Auth,
    ) -> ApiResult<()> {
        if auth.is_master {
            return Ok(());
        }
        let permissions = clp.for_operation(op);
        if permissions.is_public() {
            return Ok(());
        }
        let identities = auth.identities(&self.store).await?;
        if permissions.allows(&identities) {
            return Ok(());
        }
        debug!(
            class_name,
            op = op.as_str(),
            reason = "class_level_permission",
            "operation denied"
        );
        Err(ApiError::forbidden(format!(
            "Permission denied for action {} on class {}.",
            op.as_str(),
            class_name
        )))
    }

    /// Ensure the class exists and declares every field with a compatible
    /// type, adding what is missing.
    pub async fn ensure_fields(
        &self,
        class_name: &str,
        fields: &[(String, FieldType)],
        auth: &Auth,
    ) -> ApiResult<Arc<ClassSchema>> {
        validate_class_name(class_name)?;

        if let Some(schema) = self.cached(class_name)? {
            if check_declared(&schema, fields)? {
                return Ok(schema);
            }
        }

        let _guard = self.locks.lock(class_name).await;

        let (mut schema, is_new) = match self.store.get_class(class_name).await? {
            Some(schema) => (schema, false),
            None => {
                let is_system = SYSTEM_CLASSES.contains(&class_name);
                if !is_system && !auth.is_master && !self.allow_client_class_creation {
                    return Err(ApiError::forbidden(format!(
                        "This user is not allowed to access non-existent class: {}",
                        class_name
                    )));
                }
                (ClassSchema::new(class_name), true)
            }
        };

        check_declared(&schema, fields)?;
        let mut added = Vec::new();
        for (name, field_type) in fields {
            if schema.fields.contains_key(name) {
                continue;
            }
            validate_field_name(name)?;
            schema.fields.insert(name.clone(), field_type.clone());
            added.push(name.as_str());
        }

        if is_new {
            match self.store.create_class(schema.clone()).await {
                Ok(()) => {}
                // Created concurrently elsewhere; merge instead
                Err(ApiError::DuplicateValue(_)) => self.store.update_class(schema.clone()).await?,
                Err(err) => return Err(err),
            }
            info!(class_name, fields = ?added, "created class");
        } else if !added.is_empty() {
            self.check_permission(
                &schema.class_level_permissions,
                class_name,
                ClassOperation::AddField,
                auth,
            )
            .await?;
            self.store.update_class(schema.clone()).await?;
            info!(class_name, fields = ?added, "added fields");
        }

        self.remember(schema)
    }

    /// Replace the class-level permissions of a class, creating it if needed
    pub async fn set_permissions(
        &self,
        class_name: &str,
        permissions: ClassLevelPermissions,
    ) -> ApiResult<()> {
        validate_class_name(class_name)?;
        let _guard = self.locks.lock(class_name).await;

        match self.store.get_class(class_name).await? {
            Some(mut schema) => {
                schema.class_level_permissions = permissions;
                self.store.update_class(schema.clone()).await?;
                self.remember(schema)?;
            }
            None => {
                let mut schema = ClassSchema::new(class_name);
                schema.class_level_permissions = permissions;
                self.store.create_class(schema.clone()).await?;
                self.remember(schema)?;
            }
        }
        Ok(())
    }
}

/// Check declared fields for type conflicts. Returns whether every field is
/// already declared.
fn check_declared(schema: &ClassSchema, fields: &[(String, FieldType)]) -> ApiResult<bool> {
    let mut all_declared = true;
    for (name, incoming) in fields {
        match schema.field_type(name) {
            Some(declared) if declared.accepts(incoming) => {}
            Some(declared) => {
                return Err(ApiError::incorrect_type(format!(
                    "schema mismatch for {}.{}; expected {} but got {}",
                    schema.class_name, name, declared, incoming
                )))
            }
            None => all_declared = false,
        }
    }
    Ok(all_declared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PermissionSet;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn registry(allow_client_class_creation: bool) -> SchemaRegistry {
        let store = StoreClient::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        SchemaRegistry::new(store, allow_client_class_creation)
    }

    fn field(name: &str, field_type: FieldType) -> (String, FieldType) {
        (name.to_string(), field_type)
    }

    #[tokio::test]
    async fn test_schema_on_write() {
        let registry = registry(true);
        let auth = Auth::anonymous();

        registry
            .ensure_fields("Game", &[field("score", FieldType::Number)], &auth)
            .await
            .unwrap();

        let err = registry
            .ensure_fields("Game", &[field("score", FieldType::String)], &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::IncorrectType(_)));
        assert!(err.to_string().contains("expected Number but got String"));
    }

    #[tokio::test]
    async fn test_concurrent_same_field_additions_succeed() {
        let registry = Arc::new(registry(true));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .ensure_fields(
                        "Game",
                        &[field("level", FieldType::Number)],
                        &Auth::anonymous(),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let schema = registry.get("Game").await.unwrap().unwrap();
        assert_eq!(schema.field_type("level"), Some(&FieldType::Number));
    }

    #[tokio::test]
    async fn test_client_class_creation_can_be_disabled() {
        let registry = registry(false);
        let err = registry
            .ensure_fields("Game", &[], &Auth::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OperationForbidden(_)));

        registry
            .ensure_fields("Game", &[], &Auth::master())
            .await
            .unwrap();
        registry
            .ensure_fields("_User", &[], &Auth::anonymous())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let registry = registry(true);
        let auth = Auth::anonymous();
        assert!(matches!(
            registry.ensure_fields("bad-name", &[], &auth).await,
            Err(ApiError::InvalidClassName(_))
        ));
        assert!(matches!(
            registry
                .ensure_fields("Game", &[field("$bad", FieldType::String)], &auth)
                .await,
            Err(ApiError::InvalidKeyName(_))
        ));
    }

    #[tokio::test]
    async fn test_class_level_permissions() {
        let registry = registry(true);
        let mut clp = ClassLevelPermissions::default();
        clp.set(ClassOperation::Create, PermissionSet::master_only())
            .set(ClassOperation::AddField, PermissionSet::master_only());
        registry.set_permissions("Audit", clp).await.unwrap();

        let err = registry
            .enforce("Audit", ClassOperation::Create, &Auth::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OperationForbidden(_)));
        registry
            .enforce("Audit", ClassOperation::Find, &Auth::anonymous())
            .await
            .unwrap();
        registry
            .enforce("Audit", ClassOperation::Create, &Auth::master())
            .await
            .unwrap();

        let err = registry
            .ensure_fields("Audit", &[field("note", FieldType::String)], &Auth::anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::OperationForbidden(_)));
    }
}
