//! # Trigger Dispatcher
//!
//! Runs hooks around saves and deletes. Before-hooks run inline under a
//! deadline and may rewrite the object or veto the operation. After-hooks
//! run as detached tasks once the write has committed; their failures are
//! logged and never reach the client.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::TriggerRegistry;
use super::types::{TriggerRequest, TriggerType};
use crate::auth::Auth;
use crate::errors::{ApiError, ApiResult};
use crate::value::Document;

/// Dispatches trigger invocations to registered hooks
#[derive(Debug, Clone)]
pub struct TriggerDispatcher {
    registry: Arc<TriggerRegistry>,
    timeout: Duration,
}

impl TriggerDispatcher {
    pub fn new(registry: Arc<TriggerRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn has(&self, trigger_type: TriggerType, class_name: &str) -> bool {
        self.registry.has(trigger_type, class_name)
    }

    /// Run before-hooks and return the object as the hooks left it
    pub async fn run_before(
        &self,
        trigger_type: TriggerType,
        class_name: &str,
        auth: &Auth,
        object: Document,
        original: Option<Document>,
    ) -> ApiResult<Document> {
        let hooks = self.registry.get(trigger_type, class_name);
        if hooks.is_empty() {
            return Ok(object);
        }

        let mut request = TriggerRequest::new(trigger_type, class_name, auth, object, original);
        let chain = async {
            for hook in hooks {
                hook.run(&mut request).await?;
            }
            Ok::<(), super::HookError>(())
        };

        let outcome = tokio::time::timeout(self.timeout, chain).await;
        match outcome {
            Ok(Ok(())) => {
                debug!(trigger = %trigger_type, class_name, id = %request.id, "hooks passed");
                Ok(request.object)
            }
            Ok(Err(err)) => {
                debug!(trigger = %trigger_type, class_name, error = %err, "hook vetoed operation");
                Err(err.into())
            }
            Err(_) => {
                warn!(trigger = %trigger_type, class_name, "hook timed out");
                Err(ApiError::Timeout(format!("{} hook for {}", trigger_type, class_name)))
            }
        }
    }

    /// Start after-hooks on a detached task. Returns `None` when no hook is
    /// registered.
    pub fn run_after(
        &self,
        trigger_type: TriggerType,
        class_name: &str,
        auth: &Auth,
        object: Document,
        original: Option<Document>,
    ) -> Option<JoinHandle<()>> {
        let hooks = self.registry.get(trigger_type, class_name).to_vec();
        if hooks.is_empty() {
            return None;
        }

        let mut request = TriggerRequest::new(trigger_type, class_name, auth, object, original);
        Some(tokio::spawn(async move {
            for hook in hooks {
                if let Err(err) = hook.run(&mut request).await {
                    warn!(
                        trigger = %request.trigger_type,
                        class_name = %request.class_name,
                        id = %request.id,
                        error = %err,
                        "after hook failed"
                    );
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{FnHook, Hook, HookError};
    use crate::value::FieldValue;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl Hook for CountingHook {
        async fn run(&self, request: &mut TriggerRequest) -> Result<(), HookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            assert!(request.object.contains_key("objectId"));
            Err(HookError::new("after hooks cannot veto"))
        }
    }

    struct SlowHook;

    #[async_trait]
    impl Hook for SlowHook {
        async fn run(&self, _request: &mut TriggerRequest) -> Result<(), HookError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn object() -> Document {
        let mut doc = Document::new();
        doc.insert("objectId".into(), FieldValue::string("a"));
        doc
    }

    #[tokio::test]
    async fn test_no_hooks_is_noop() {
        let dispatcher = TriggerDispatcher::new(Arc::new(TriggerRegistry::new()), Duration::from_secs(1));
        let result = dispatcher
            .run_before(TriggerType::BeforeSave, "Game", &Auth::anonymous(), object(), None)
            .await
            .unwrap();
        assert_eq!(result, object());
        assert!(dispatcher
            .run_after(TriggerType::AfterSave, "Game", &Auth::anonymous(), object(), None)
            .is_none());
    }

    #[tokio::test]
    async fn test_before_hooks_chain_rewrites() {
        let registry = TriggerRegistry::new()
            .with_hook(
                TriggerType::BeforeSave,
                "Game",
                Arc::new(FnHook(|req: &mut TriggerRequest| {
                    req.object.insert("score".into(), FieldValue::from_i64(1));
                    Ok(())
                })),
            )
            .with_hook(
                TriggerType::BeforeSave,
                "Game",
                Arc::new(FnHook(|req: &mut TriggerRequest| {
                    let score = req.object.get("score").and_then(FieldValue::as_i64).unwrap_or(0);
                    req.object.insert("score".into(), FieldValue::from_i64(score + 1));
                    Ok(())
                })),
            );
        let dispatcher = TriggerDispatcher::new(Arc::new(registry), Duration::from_secs(1));

        let result = dispatcher
            .run_before(TriggerType::BeforeSave, "Game", &Auth::anonymous(), object(), None)
            .await
            .unwrap();
        assert_eq!(result["score"], FieldValue::from_i64(2));
    }

    #[tokio::test]
    async fn test_before_hook_veto_propagates_verbatim() {
        let registry = TriggerRegistry::new().with_hook(
            TriggerType::BeforeDelete,
            "Game",
            Arc::new(FnHook(|_: &mut TriggerRequest| {
                Err(HookError::with_code(142, "cannot delete"))
            })),
        );
        let dispatcher = TriggerDispatcher::new(Arc::new(registry), Duration::from_secs(1));

        let err = dispatcher
            .run_before(TriggerType::BeforeDelete, "Game", &Auth::anonymous(), object(), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Hook {
                code: 142,
                message: "cannot delete".into()
            }
        );
    }

    #[tokio::test]
    async fn test_before_hook_timeout() {
        let registry =
            TriggerRegistry::new().with_hook(TriggerType::BeforeSave, "Game", Arc::new(SlowHook));
        let dispatcher = TriggerDispatcher::new(Arc::new(registry), Duration::from_millis(10));

        let err = dispatcher
            .run_before(TriggerType::BeforeSave, "Game", &Auth::anonymous(), object(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_after_hook_errors_are_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = TriggerRegistry::new().with_hook(
            TriggerType::AfterSave,
            "Game",
            Arc::new(CountingHook(calls.clone())),
        );
        let dispatcher = TriggerDispatcher::new(Arc::new(registry), Duration::from_secs(1));

        let handle = dispatcher
            .run_after(TriggerType::AfterSave, "Game", &Auth::anonymous(), object(), None)
            .unwrap();
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
