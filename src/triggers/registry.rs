//! # Trigger Registry
//!
//! Hook table built once at startup and immutable afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{Hook, TriggerType};

/// Hooks keyed by trigger type and class, in registration order
#[derive(Default, Clone)]
pub struct TriggerRegistry {
    hooks: HashMap<(TriggerType, String), Vec<Arc<dyn Hook>>>,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .hooks
            .iter()
            .map(|((trigger, class), hooks)| format!("{}:{} ({})", trigger, class, hooks.len()))
            .collect();
        keys.sort();
        f.debug_struct("TriggerRegistry").field("hooks", &keys).finish()
    }
}

impl TriggerRegistry {
    /// Registry without hooks
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook
    pub fn with_hook(
        mut self,
        trigger_type: TriggerType,
        class_name: impl Into<String>,
        hook: Arc<dyn Hook>,
    ) -> Self {
        self.hooks
            .entry((trigger_type, class_name.into()))
            .or_default()
            .push(hook);
        self
    }

    /// Hooks for a trigger type and class
    pub fn get(&self, trigger_type: TriggerType, class_name: &str) -> &[Arc<dyn Hook>] {
        self.hooks
            .get(&(trigger_type, class_name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has(&self, trigger_type: TriggerType, class_name: &str) -> bool {
        !self.get(trigger_type, class_name).is_empty()
    }

    /// Number of registered hooks
    pub fn len(&self) -> usize {
        self.hooks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
