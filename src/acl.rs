//! # Access Control Lists
//!
//! Per-object grants stored under the reserved `ACL` field:
//!
//! ```text
//! { "*": {"read": true}, "u1": {"read": true, "write": true}, "role:admin": {"write": true} }
//! ```
//!
//! An object without an `ACL` field is public for reads and writes.

use std::collections::BTreeMap;

use crate::errors::{ApiError, ApiResult};
use crate::value::{Document, FieldValue};

/// Identity granted to everyone
pub const PUBLIC: &str = "*";

/// Prefix of role identities
pub const ROLE_PREFIX: &str = "role:";

/// Reserved field holding the ACL
pub const ACL_FIELD: &str = "ACL";

/// Kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Read/write grant for one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Grant {
    pub read: bool,
    pub write: bool,
}

impl Grant {
    fn allows(&self, access: Access) -> bool {
        match access {
            Access::Read => self.read,
            Access::Write => self.write,
        }
    }
}

/// Access-control list for a single object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<String, Grant>,
}

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant or revoke read access for an identity
    pub fn set_read(&mut self, identity: impl Into<String>, allowed: bool) -> &mut Self {
        self.entries.entry(identity.into()).or_default().read = allowed;
        self
    }

    /// Grant or revoke write access for an identity
    pub fn set_write(&mut self, identity: impl Into<String>, allowed: bool) -> &mut Self {
        self.entries.entry(identity.into()).or_default().write = allowed;
        self
    }

    pub fn grant(&self, identity: &str) -> Option<Grant> {
        self.entries.get(identity).copied()
    }

    /// Whether any of the identities holds the requested access
    pub fn permits(&self, access: Access, identities: &[String]) -> bool {
        identities
            .iter()
            .filter_map(|id| self.entries.get(id))
            .any(|grant| grant.allows(access))
    }

    /// Parse and validate a client-supplied ACL value
    pub fn from_value(value: &FieldValue) -> ApiResult<Self> {
        let doc = value
            .as_document()
            .ok_or_else(|| ApiError::InvalidAcl("ACL must be an object".to_string()))?;

        let mut acl = Acl::new();
        for (identity, perms) in doc {
            if identity.is_empty() || identity == ROLE_PREFIX {
                return Err(ApiError::InvalidAcl(format!(
                    "invalid ACL identity: '{}'",
                    identity
                )));
            }
            let perms = perms.as_document().ok_or_else(|| {
                ApiError::InvalidAcl(format!("permissions for '{}' must be an object", identity))
            })?;
            let mut grant = Grant::default();
            for (perm, allowed) in perms {
                let FieldValue::Bool(allowed) = allowed else {
                    return Err(ApiError::InvalidAcl(format!(
                        "permission '{}' must be a boolean",
                        perm
                    )));
                };
                match perm.as_str() {
                    "read" => grant.read = *allowed,
                    "write" => grant.write = *allowed,
                    other => {
                        return Err(ApiError::InvalidAcl(format!(
                            "unknown ACL permission: '{}'",
                            other
                        )))
                    }
                }
            }
            acl.entries.insert(identity.clone(), grant);
        }
        Ok(acl)
    }

    /// Encode as the stored field value
    pub fn to_value(&self) -> FieldValue {
        let mut doc = Document::new();
        for (identity, grant) in &self.entries {
            let mut perms = Document::new();
            if grant.read {
                perms.insert("read".into(), FieldValue::Bool(true));
            }
            if grant.write {
                perms.insert("write".into(), FieldValue::Bool(true));
            }
            if !perms.is_empty() {
                doc.insert(identity.clone(), FieldValue::Object(perms));
            }
        }
        FieldValue::Object(doc)
    }
}

/// Evaluate the ACL stored on an object.
///
/// A missing ACL is public; a stored ACL that no longer parses grants nothing.
pub fn object_permits(doc: &Document, access: Access, identities: &[String]) -> bool {
    match doc.get(ACL_FIELD) {
        None | Some(FieldValue::Null) => true,
        Some(value) => Acl::from_value(value)
            .map(|acl| acl.permits(access, identities))
            .unwrap_or(false),
    }
}

/// Identity used for a role name
pub fn role_identity(name: &str) -> String {
    format!("{}{}", ROLE_PREFIX, name)
}
