//! # Store Errors

use thiserror::Error;

use crate::errors::ApiError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a `Store` implementation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Unique field already holds this value
    #[error("Duplicate value for unique field: {0}")]
    Duplicate(String),

    /// Class does not exist
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    /// Update operator not applicable to the stored value
    #[error("{0}")]
    InvalidOperation(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(_) => ApiError::DuplicateValue(
                "A duplicate value for a field with unique values was provided".to_string(),
            ),
            StoreError::ClassNotFound(class) => {
                ApiError::not_found(format!("Class not found: {}", class))
            }
            StoreError::InvalidOperation(msg) => ApiError::IncorrectType(msg),
            StoreError::Unavailable(msg) | StoreError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
