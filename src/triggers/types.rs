//! # Trigger Types

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::HookResult;
use crate::auth::{Auth, UserRef};
use crate::value::Document;

/// Point in an operation where hooks run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerType {
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::BeforeSave => "beforeSave",
            TriggerType::AfterSave => "afterSave",
            TriggerType::BeforeDelete => "beforeDelete",
            TriggerType::AfterDelete => "afterDelete",
        }
    }

    /// Before-hooks may rewrite or veto; after-hooks only observe
    pub fn is_before(&self) -> bool {
        matches!(self, TriggerType::BeforeSave | TriggerType::BeforeDelete)
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a hook sees about one invocation
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    /// Invocation id, for correlating log lines
    pub id: Uuid,
    pub trigger_type: TriggerType,
    pub class_name: String,

    /// Object being saved or deleted; before-save hooks may modify it
    pub object: Document,

    /// Stored object before an update
    pub original: Option<Document>,

    pub master: bool,
    pub user: Option<UserRef>,
    pub installation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TriggerRequest {
    pub fn new(
        trigger_type: TriggerType,
        class_name: &str,
        auth: &Auth,
        object: Document,
        original: Option<Document>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_type,
            class_name: class_name.to_string(),
            object,
            original,
            master: auth.is_master,
            user: auth.user.clone(),
            installation_id: auth.installation_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Application hook
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, request: &mut TriggerRequest) -> HookResult<()>;
}

/// Hook backed by a synchronous closure
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&mut TriggerRequest) -> HookResult<()> + Send + Sync,
{
    async fn run(&self, request: &mut TriggerRequest) -> HookResult<()> {
        (self.0)(request)
    }
}
