//! # Auth Resolver
//!
//! Turns request credentials into an `Auth` context:
//!
//! 1. the application id must match, else `Unauthorized`
//! 2. a matching master key yields a master context
//! 3. otherwise the client key must match, else `Unauthorized`
//! 4. without a session token the context is anonymous
//! 5. a session token must resolve to a live session, else
//!    `InvalidSessionToken`

use std::sync::Arc;

use tracing::debug;

use super::cache::SessionCache;
use super::context::Auth;
use super::crypto::constant_time_str_eq;
use super::session::SessionManager;
use crate::config::AppConfig;
use crate::errors::{ApiError, ApiResult};

/// Credentials extracted from a request
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub app_id: Option<String>,
    pub master_key: Option<String>,
    pub client_key: Option<String>,
    pub session_token: Option<String>,
    pub installation_id: Option<String>,
}

/// Resolves credentials into authorization contexts
#[derive(Debug, Clone)]
pub struct AuthResolver {
    config: Arc<AppConfig>,
    sessions: SessionManager,
    cache: Arc<SessionCache>,
}

impl AuthResolver {
    pub fn new(config: Arc<AppConfig>, sessions: SessionManager, cache: Arc<SessionCache>) -> Self {
        Self {
            config,
            sessions,
            cache,
        }
    }

    /// Resolve credentials. With `ignore_session` (the login endpoint) any
    /// session token is dropped unread.
    pub async fn resolve(&self, credentials: &Credentials, ignore_session: bool) -> ApiResult<Auth> {
        let app_id_matches = credentials
            .app_id
            .as_deref()
            .map(|id| id == self.config.app_id)
            .unwrap_or(false);
        if !app_id_matches {
            debug!(reason = "app_id", "request unauthorized");
            return Err(ApiError::Unauthorized);
        }

        let installation_id = credentials.installation_id.clone();

        if let Some(master_key) = credentials.master_key.as_deref() {
            if constant_time_str_eq(master_key, &self.config.master_key) {
                return Ok(Auth::master().with_installation_id(installation_id));
            }
        }

        let client_key_matches = credentials
            .client_key
            .as_deref()
            .map(|key| constant_time_str_eq(key, &self.config.client_key))
            .unwrap_or(false);
        if !client_key_matches {
            debug!(reason = "client_key", "request unauthorized");
            return Err(ApiError::Unauthorized);
        }

        let token = match credentials.session_token.as_deref() {
            Some(token) if !ignore_session && !token.is_empty() => token,
            _ => return Ok(Auth::anonymous().with_installation_id(installation_id)),
        };

        if let Some((user, session_installation)) = self.cache.get(token) {
            return Ok(Auth::for_user(user, Some(token.to_string()))
                .with_installation_id(installation_id.or(session_installation)));
        }

        match self.sessions.lookup(token).await? {
            Some((user, session_installation)) => {
                self.cache.put(token, user.clone(), session_installation.clone());
                Ok(Auth::for_user(user, Some(token.to_string()))
                    .with_installation_id(installation_id.or(session_installation)))
            }
            None => {
                debug!(reason = "unknown_or_expired_session", "request rejected");
                Err(ApiError::InvalidSessionToken)
            }
        }
    }
}
