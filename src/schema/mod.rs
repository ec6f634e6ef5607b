//! # Schema
//!
//! Per-class field types and class-level permissions, extended on write.

mod registry;
mod types;

pub use registry::SchemaRegistry;
pub use types::{
    join_class_name, validate_class_name, validate_field_name, ClassLevelPermissions,
    ClassOperation, ClassSchema, FieldType, PermissionSet, INSTALLATION_CLASS, ROLE_CLASS,
    SESSION_CLASS, SYSTEM_CLASSES, USER_CLASS,
};
