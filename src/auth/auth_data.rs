//! # Third-Party Auth Data
//!
//! `authData` maps a provider name to provider-specific credentials. Each
//! provider is checked by a registered `AuthDataValidator`; the checks are
//! untrusted network calls and run as their own tasks under a deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::{ApiError, ApiResult};
use crate::value::{Document, FieldValue};

/// Verifies one provider's credentials
#[async_trait]
pub trait AuthDataValidator: Send + Sync {
    /// Verify the provider data and return the provider-side user id
    async fn verify(&self, data: &Document) -> ApiResult<String>;
}

/// Provider that only requires a client-chosen `id`
#[derive(Debug, Default)]
pub struct AnonymousValidator;

#[async_trait]
impl AuthDataValidator for AnonymousValidator {
    async fn verify(&self, data: &Document) -> ApiResult<String> {
        data.get("id")
            .and_then(FieldValue::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::ObjectNotFound("anonymous id is required".to_string()))
    }
}

/// A verified provider identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub provider: String,
    pub id: String,
}

impl ProviderIdentity {
    /// Dotted field path of this identity's id on `_User`
    pub fn id_path(&self) -> String {
        format!("authData.{}.id", self.provider)
    }
}

/// Registry of auth-data validators
#[derive(Clone)]
pub struct AuthDataManager {
    validators: HashMap<String, Arc<dyn AuthDataValidator>>,
    timeout: Duration,
}

impl std::fmt::Debug for AuthDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthDataManager")
            .field("providers", &self.validators.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AuthDataManager {
    /// Manager with the built-in `anonymous` provider
    pub fn new(timeout: Duration) -> Self {
        let mut validators: HashMap<String, Arc<dyn AuthDataValidator>> = HashMap::new();
        validators.insert("anonymous".to_string(), Arc::new(AnonymousValidator));
        Self {
            validators,
            timeout,
        }
    }

    pub fn with_validator(
        mut self,
        provider: impl Into<String>,
        validator: Arc<dyn AuthDataValidator>,
    ) -> Self {
        self.validators.insert(provider.into(), validator);
        self
    }

    /// Verify every provider in `auth_data`. Null entries (unlinking) are
    /// skipped.
    pub async fn verify_all(&self, auth_data: &Document) -> ApiResult<Vec<ProviderIdentity>> {
        let mut identities = Vec::new();
        for (provider, data) in auth_data {
            if data.is_null() {
                continue;
            }
            let validator = self.validators.get(provider).ok_or_else(|| {
                ApiError::UnsupportedService(provider.clone())
            })?;
            let data = data.as_document().cloned().ok_or_else(|| {
                ApiError::InvalidJson(format!("authData.{} must be an object", provider))
            })?;

            let validator = validator.clone();
            let handle = tokio::spawn(async move { validator.verify(&data).await });
            let id = match tokio::time::timeout(self.timeout, handle).await {
                Ok(Ok(result)) => result?,
                Ok(Err(join_err)) => {
                    return Err(ApiError::internal(format!(
                        "auth data validation failed: {}",
                        join_err
                    )))
                }
                Err(_) => {
                    warn!(provider = %provider, "auth data validation timed out");
                    return Err(ApiError::Timeout(format!("authData.{}", provider)));
                }
            };
            identities.push(ProviderIdentity {
                provider: provider.clone(),
                id,
            });
        }
        Ok(identities)
    }
}
