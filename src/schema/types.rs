//! # Schema Types
//!
//! Field types, class-level permissions and the per-class schema record.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use crate::acl::PUBLIC;
use crate::errors::{ApiError, ApiResult};
use crate::value::FieldValue;

pub const USER_CLASS: &str = "_User";
pub const SESSION_CLASS: &str = "_Session";
pub const ROLE_CLASS: &str = "_Role";
pub const INSTALLATION_CLASS: &str = "_Installation";

/// Classes that exist without being created by a client
pub const SYSTEM_CLASSES: [&str; 4] = [USER_CLASS, ROLE_CLASS, SESSION_CLASS, INSTALLATION_CLASS];

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    Acl,
    Pointer { target_class: String },
    Relation { target_class: String },
}

impl FieldType {
    pub fn pointer(target_class: impl Into<String>) -> Self {
        FieldType::Pointer {
            target_class: target_class.into(),
        }
    }

    pub fn relation(target_class: impl Into<String>) -> Self {
        FieldType::Relation {
            target_class: target_class.into(),
        }
    }

    /// Infer a type from a stored value. `Null` carries no type.
    pub fn infer(value: &FieldValue) -> Option<FieldType> {
        Some(match value {
            FieldValue::Null => return None,
            FieldValue::Bool(_) => FieldType::Boolean,
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Pointer(p) => FieldType::pointer(p.class_name.clone()),
            FieldValue::GeoPoint { .. } => FieldType::GeoPoint,
            FieldValue::File { .. } => FieldType::File,
            FieldValue::Array(_) => FieldType::Array,
            FieldValue::Object(_) => FieldType::Object,
        })
    }

    /// Whether a value of type `incoming` may be written to a field of this type
    pub fn accepts(&self, incoming: &FieldType) -> bool {
        self == incoming || matches!((self, incoming), (FieldType::Acl, FieldType::Object))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Number => write!(f, "Number"),
            FieldType::Boolean => write!(f, "Boolean"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Object => write!(f, "Object"),
            FieldType::Array => write!(f, "Array"),
            FieldType::GeoPoint => write!(f, "GeoPoint"),
            FieldType::File => write!(f, "File"),
            FieldType::Acl => write!(f, "ACL"),
            FieldType::Pointer { target_class } => write!(f, "Pointer<{}>", target_class),
            FieldType::Relation { target_class } => write!(f, "Relation<{}>", target_class),
        }
    }
}

/// Operation guarded by class-level permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassOperation {
    Find,
    Get,
    Create,
    Update,
    Delete,
    AddField,
}

impl ClassOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassOperation::Find => "find",
            ClassOperation::Get => "get",
            ClassOperation::Create => "create",
            ClassOperation::Update => "update",
            ClassOperation::Delete => "delete",
            ClassOperation::AddField => "addField",
        }
    }
}

/// Identities allowed to perform one operation. Empty means master only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn public() -> Self {
        Self::only([PUBLIC])
    }

    pub fn master_only() -> Self {
        Self::default()
    }

    pub fn only<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(identities.into_iter().map(Into::into).collect())
    }

    pub fn is_public(&self) -> bool {
        self.0.contains(PUBLIC)
    }

    pub fn allows(&self, identities: &[String]) -> bool {
        self.is_public() || identities.iter().any(|id| self.0.contains(id))
    }
}

/// Class-level permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLevelPermissions {
    pub find: PermissionSet,
    pub get: PermissionSet,
    pub create: PermissionSet,
    pub update: PermissionSet,
    pub delete: PermissionSet,
    pub add_field: PermissionSet,
}

impl Default for ClassLevelPermissions {
    fn default() -> Self {
        Self {
            find: PermissionSet::public(),
            get: PermissionSet::public(),
            create: PermissionSet::public(),
            update: PermissionSet::public(),
            delete: PermissionSet::public(),
            add_field: PermissionSet::public(),
        }
    }
}

impl ClassLevelPermissions {
    pub fn for_operation(&self, op: ClassOperation) -> &PermissionSet {
        match op {
            ClassOperation::Find => &self.find,
            ClassOperation::Get => &self.get,
            ClassOperation::Create => &self.create,
            ClassOperation::Update => &self.update,
            ClassOperation::Delete => &self.delete,
            ClassOperation::AddField => &self.add_field,
        }
    }

    pub fn set(&mut self, op: ClassOperation, permissions: PermissionSet) -> &mut Self {
        let slot = match op {
            ClassOperation::Find => &mut self.find,
            ClassOperation::Get => &mut self.get,
            ClassOperation::Create => &mut self.create,
            ClassOperation::Update => &mut self.update,
            ClassOperation::Delete => &mut self.delete,
            ClassOperation::AddField => &mut self.add_field,
        };
        *slot = permissions;
        self
    }
}

/// Schema of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSchema {
    pub class_name: String,
    pub fields: IndexMap<String, FieldType>,
    pub class_level_permissions: ClassLevelPermissions,
}

impl ClassSchema {
    /// New class with the default fields every object carries
    pub fn new(class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let mut fields = IndexMap::new();
        fields.insert("objectId".to_string(), FieldType::String);
        fields.insert("createdAt".to_string(), FieldType::Date);
        fields.insert("updatedAt".to_string(), FieldType::Date);
        fields.insert("ACL".to_string(), FieldType::Acl);

        let extra: &[(&str, FieldType)] = match class_name.as_str() {
            USER_CLASS => &[
                ("username", FieldType::String),
                ("email", FieldType::String),
                ("emailVerified", FieldType::Boolean),
                ("authData", FieldType::Object),
                ("_hashed_password", FieldType::String),
                ("_failed_login_count", FieldType::Number),
                ("_account_lockout_expires_at", FieldType::Date),
            ],
            SESSION_CLASS => &[
                ("sessionToken", FieldType::String),
                ("expiresAt", FieldType::Date),
                ("installationId", FieldType::String),
                ("createdWith", FieldType::Object),
                ("restricted", FieldType::Boolean),
            ],
            INSTALLATION_CLASS => &[
                ("installationId", FieldType::String),
                ("deviceType", FieldType::String),
                ("deviceToken", FieldType::String),
                ("appIdentifier", FieldType::String),
            ],
            ROLE_CLASS => &[("name", FieldType::String)],
            _ => &[],
        };
        for (name, field_type) in extra {
            fields.insert((*name).to_string(), field_type.clone());
        }

        let mut schema = Self {
            class_name,
            fields,
            class_level_permissions: ClassLevelPermissions::default(),
        };
        match schema.class_name.as_str() {
            SESSION_CLASS => {
                schema
                    .fields
                    .insert("user".to_string(), FieldType::pointer(USER_CLASS));
            }
            ROLE_CLASS => {
                schema
                    .fields
                    .insert("users".to_string(), FieldType::relation(USER_CLASS));
                schema
                    .fields
                    .insert("roles".to_string(), FieldType::relation(ROLE_CLASS));
            }
            _ => {}
        }
        schema
    }

    pub fn field_type(&self, field: &str) -> Option<&FieldType> {
        self.fields.get(field)
    }

    /// Add fields that are not yet declared. Declared types are never replaced.
    pub fn merge_fields(&mut self, other: &ClassSchema) {
        for (name, field_type) in &other.fields {
            self.fields
                .entry(name.clone())
                .or_insert_with(|| field_type.clone());
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Validate a class name
pub fn validate_class_name(name: &str) -> ApiResult<()> {
    if SYSTEM_CLASSES.contains(&name) || is_identifier(name) {
        Ok(())
    } else {
        Err(ApiError::InvalidClassName(format!(
            "Invalid class name: {}",
            name
        )))
    }
}

/// Validate a client-supplied field name
pub fn validate_field_name(name: &str) -> ApiResult<()> {
    if name == "ACL" || is_identifier(name) {
        Ok(())
    } else {
        Err(ApiError::invalid_key(format!("Invalid field name: {}", name)))
    }
}

/// Join class holding a relation field's rows
pub fn join_class_name(field: &str, owning_class: &str) -> String {
    format!("_Join:{}:{}", field, owning_class)
}
