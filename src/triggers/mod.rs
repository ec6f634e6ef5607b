//! # Triggers
//!
//! Application hooks around saves and deletes, registered in a table built
//! at startup.

mod dispatcher;
mod errors;
mod registry;
mod types;

pub use dispatcher::TriggerDispatcher;
pub use errors::{HookError, HookResult};
pub use registry::TriggerRegistry;
pub use types::{FnHook, Hook, TriggerRequest, TriggerType};
