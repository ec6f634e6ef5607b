//! # Account Lockout
//!
//! Failed-login counter and timed lockout, stored on the `_User` object:
//!
//! - `_failed_login_count`: consecutive failures since the last success
//! - `_account_lockout_expires_at`: end of the current lockout window
//!
//! An account is locked while the window is open and the count is at or
//! above the threshold. Expiry is evaluated when checked, never swept.
//! Attempts for one username are serialized by a per-username lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::config::LockoutConfig;
use crate::errors::{ApiError, ApiResult};
use crate::locks::KeyedLocks;
use crate::query::{Constraint, Query};
use crate::schema::USER_CLASS;
use crate::store::{StoreClient, StoreUpdate, Updates};
use crate::value::FieldValue;

pub const FAILED_LOGIN_COUNT: &str = "_failed_login_count";
pub const LOCKOUT_EXPIRES_AT: &str = "_account_lockout_expires_at";

/// Login-attempt state machine
#[derive(Debug)]
pub struct AccountLockout {
    store: StoreClient,
    policy: LockoutConfig,
    locks: Arc<KeyedLocks>,
}

impl AccountLockout {
    pub fn new(store: StoreClient, policy: LockoutConfig) -> Self {
        Self {
            store,
            policy,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    fn by_username(username: &str) -> Query {
        Query::eq("username", username)
    }

    fn threshold(&self) -> FieldValue {
        FieldValue::from_i64(self.policy.threshold)
    }

    /// Record the outcome of a password check. Fails with the locked-account
    /// error when the account is, or just became, locked.
    pub async fn handle_login_attempt(&self, username: &str, succeeded: bool) -> ApiResult<()> {
        if !self.policy.enabled() {
            return Ok(());
        }
        let _guard = self.locks.lock(username).await;

        self.not_locked(username).await?;
        if succeeded {
            self.set_failed_login_count(username, 0).await
        } else {
            self.handle_failed_attempt(username).await
        }
    }

    /// Fail with `ObjectNotFound` while the account is locked
    pub async fn not_locked(&self, username: &str) -> ApiResult<()> {
        if !self.policy.enabled() {
            return Ok(());
        }
        let query = Self::by_username(username)
            .and_field(LOCKOUT_EXPIRES_AT, Constraint::Gt(FieldValue::Date(Utc::now())))
            .and_field(FAILED_LOGIN_COUNT, Constraint::Gte(self.threshold()));

        if self.store.count(USER_CLASS, &query).await? > 0 {
            tracing::debug!(username, reason = "account_locked", "login rejected");
            return Err(ApiError::not_found(format!(
                "Your account is locked due to multiple failed login attempts. Please try again after {} minute(s)",
                self.policy.duration_minutes
            )));
        }
        Ok(())
    }

    async fn handle_failed_attempt(&self, username: &str) -> ApiResult<()> {
        self.init_failed_login_count(username).await?;
        self.increment_failed_login_count(username).await?;
        self.set_lockout_expiration(username).await?;
        self.not_locked(username).await
    }

    /// Start the counter at zero when it has never been set
    async fn init_failed_login_count(&self, username: &str) -> ApiResult<()> {
        let query = Self::by_username(username).and_field(FAILED_LOGIN_COUNT, Constraint::Exists(false));
        let mut updates = Updates::new();
        updates.insert(FAILED_LOGIN_COUNT.to_string(), StoreUpdate::Set(FieldValue::from_i64(0)));
        self.store.update_many(USER_CLASS, &query, updates).await?;
        Ok(())
    }

    async fn increment_failed_login_count(&self, username: &str) -> ApiResult<()> {
        let mut updates = Updates::new();
        updates.insert(
            FAILED_LOGIN_COUNT.to_string(),
            StoreUpdate::Increment(FieldValue::from_i64(1)),
        );
        self.store
            .update_many(USER_CLASS, &Self::by_username(username), updates)
            .await?;
        Ok(())
    }

    /// Open the lockout window once the count reaches the threshold
    async fn set_lockout_expiration(&self, username: &str) -> ApiResult<()> {
        let query = Self::by_username(username)
            .and_field(FAILED_LOGIN_COUNT, Constraint::Gte(self.threshold()));
        let expires_at = Utc::now() + Duration::minutes(self.policy.duration_minutes);
        let mut updates = Updates::new();
        updates.insert(
            LOCKOUT_EXPIRES_AT.to_string(),
            StoreUpdate::Set(FieldValue::Date(expires_at)),
        );
        let locked = self.store.update_many(USER_CLASS, &query, updates).await?;
        if locked > 0 {
            warn!(
                username,
                minutes = self.policy.duration_minutes,
                "account locked after repeated failed logins"
            );
        }
        Ok(())
    }

    async fn set_failed_login_count(&self, username: &str, count: i64) -> ApiResult<()> {
        let mut updates = Updates::new();
        updates.insert(
            FAILED_LOGIN_COUNT.to_string(),
            StoreUpdate::Set(FieldValue::from_i64(count)),
        );
        self.store
            .update_many(USER_CLASS, &Self::by_username(username), updates)
            .await?;
        Ok(())
    }
}
