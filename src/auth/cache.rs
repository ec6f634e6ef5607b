//! # Session Cache
//!
//! Short-lived map from session token to the resolved user. Role membership
//! is never cached here; it is resolved per request.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::context::UserRef;

#[derive(Debug, Clone)]
struct CachedSession {
    user: UserRef,
    installation_id: Option<String>,
    cached_at: Instant,
}

/// Identity cache keyed by session token
#[derive(Debug)]
pub struct SessionCache {
    ttl: Duration,
    entries: DashMap<String, CachedSession>,
}

impl SessionCache {
    /// A zero `ttl` disables caching
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, token: &str) -> Option<(UserRef, Option<String>)> {
        let entry = self.entries.get(token)?;
        if entry.cached_at.elapsed() < self.ttl {
            return Some((entry.user.clone(), entry.installation_id.clone()));
        }
        drop(entry);
        self.entries.remove(token);
        None
    }

    pub fn put(&self, token: &str, user: UserRef, installation_id: Option<String>) {
        if self.ttl.is_zero() {
            return;
        }
        // Tokens that are never presented again would otherwise stay forever
        let ttl = self.ttl;
        self.entries.retain(|_, cached| cached.cached_at.elapsed() < ttl);
        self.entries.insert(
            token.to_string(),
            CachedSession {
                user,
                installation_id,
                cached_at: Instant::now(),
            },
        );
    }

    /// Forget a single session
    pub fn evict_token(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Forget every session of a user
    pub fn evict_user(&self, user_id: &str) {
        self.entries.retain(|_, cached| cached.user.object_id != user_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
