//! # REST Core
//!
//! Entry points of the object API. Each operation takes the caller's `Auth`
//! and runs the same pipeline regardless of transport:
//!
//! ```text
//! validate input -> class-level permission -> before hook -> schema
//!   -> persist (ACL constrained) -> after hook
//! ```
//!
//! The orchestrators live in their own files as further `impl RestService`
//! blocks.

mod client_sdk;
mod create;
mod destroy;
mod find;
mod include;
mod operations;
mod update;
mod users;

pub use client_sdk::ClientSdk;
pub use operations::{parse_body, FieldOp, FieldOps};

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::acl::{object_permits, Access};
use crate::auth::{
    AccountLockout, Auth, AuthDataManager, AuthDataValidator, AuthResolver, Credentials,
    SessionCache, SessionManager,
};
use crate::config::AppConfig;
use crate::errors::ApiResult;
use crate::query::Query;
use crate::schema::SchemaRegistry;
use crate::store::{Store, StoreClient};
use crate::triggers::{TriggerDispatcher, TriggerRegistry};
use crate::value::Document;

/// Fields the server owns on every object
pub const RESERVED_FIELDS: [&str; 3] = ["objectId", "createdAt", "updatedAt"];

/// Result of a create
#[derive(Debug, Clone)]
pub struct CreateResponse {
    /// `false` when an auth-data signup logged into an existing user
    pub created: bool,
    pub location: String,
    pub response: Value,
}

/// Result of a find
#[derive(Debug, Clone, Default)]
pub struct FindResponse {
    pub results: Vec<Value>,
    pub count: Option<usize>,
}

impl FindResponse {
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("results".into(), Value::Array(self.results.clone()));
        if let Some(count) = self.count {
            body.insert("count".into(), json!(count));
        }
        Value::Object(body)
    }
}

struct Inner {
    config: Arc<AppConfig>,
    store: StoreClient,
    schema: Arc<SchemaRegistry>,
    triggers: TriggerDispatcher,
    sessions: SessionManager,
    session_cache: Arc<SessionCache>,
    resolver: AuthResolver,
    lockout: AccountLockout,
    auth_data: AuthDataManager,
}

/// Object API over a store
#[derive(Clone)]
pub struct RestService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestService")
            .field("app_id", &self.inner.config.app_id)
            .field("store", &self.inner.store)
            .finish()
    }
}

/// Builder for `RestService`
pub struct RestServiceBuilder {
    config: AppConfig,
    store: Arc<dyn Store>,
    triggers: TriggerRegistry,
    validators: Vec<(String, Arc<dyn AuthDataValidator>)>,
}

impl RestServiceBuilder {
    /// Hook table used by the dispatcher
    pub fn with_triggers(mut self, triggers: TriggerRegistry) -> Self {
        self.triggers = triggers;
        self
    }

    /// Register a third-party auth provider
    pub fn with_auth_provider(
        mut self,
        provider: impl Into<String>,
        validator: Arc<dyn AuthDataValidator>,
    ) -> Self {
        self.validators.push((provider.into(), validator));
        self
    }

    pub fn build(self) -> RestService {
        let config = Arc::new(self.config);
        let store = StoreClient::new(self.store, config.store_timeout());
        let schema = Arc::new(SchemaRegistry::new(
            store.clone(),
            config.allow_client_class_creation,
        ));
        let triggers = TriggerDispatcher::new(Arc::new(self.triggers), config.hook_timeout());
        let sessions = SessionManager::new(store.clone(), config.session_length());
        let session_cache = Arc::new(SessionCache::new(config.session_cache_ttl()));
        let resolver = AuthResolver::new(config.clone(), sessions.clone(), session_cache.clone());
        let lockout = AccountLockout::new(store.clone(), config.account_lockout.clone());

        let mut auth_data = AuthDataManager::new(config.auth_data_timeout());
        for (provider, validator) in self.validators {
            auth_data = auth_data.with_validator(provider, validator);
        }

        RestService {
            inner: Arc::new(Inner {
                config,
                store,
                schema,
                triggers,
                sessions,
                session_cache,
                resolver,
                lockout,
                auth_data,
            }),
        }
    }
}

impl RestService {
    /// Service with no hooks and only the built-in auth providers
    pub fn new(config: AppConfig, store: Arc<dyn Store>) -> Self {
        Self::builder(config, store).build()
    }

    pub fn builder(config: AppConfig, store: Arc<dyn Store>) -> RestServiceBuilder {
        RestServiceBuilder {
            config,
            store,
            triggers: TriggerRegistry::new(),
            validators: Vec::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &StoreClient {
        &self.inner.store
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.inner.schema
    }

    pub fn session_cache(&self) -> &SessionCache {
        &self.inner.session_cache
    }

    /// Resolve request credentials into an authorization context
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        ignore_session: bool,
    ) -> ApiResult<Auth> {
        self.inner.resolver.resolve(credentials, ignore_session).await
    }

    /// Whether the object's ACL grants `access` to the caller
    async fn permits(&self, auth: &Auth, doc: &Document, access: Access) -> ApiResult<bool> {
        if auth.is_master {
            return Ok(true);
        }
        let identities = auth.identities(&self.inner.store).await?;
        Ok(object_permits(doc, access, &identities))
    }

    /// Constrain a query to objects the caller may access
    async fn restrict(&self, query: Query, auth: &Auth, access: Access) -> ApiResult<Query> {
        if auth.is_master {
            return Ok(query);
        }
        let identities = auth.identities(&self.inner.store).await?;
        Ok(query.with_permission(access, identities))
    }

    fn location(&self, class_name: &str, object_id: &str) -> String {
        format!(
            "{}/classes/{}/{}",
            self.inner.config.server_url.trim_end_matches('/'),
            class_name,
            object_id
        )
    }
}
