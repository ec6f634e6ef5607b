//! # Hook Errors

use thiserror::Error;

use crate::errors::{codes, ApiError};

/// Result type for hook execution
pub type HookResult<T> = Result<T, HookError>;

/// Error raised by a hook to veto an operation.
///
/// Propagated to the client verbatim, code and message.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HookError {
    pub code: i32,
    pub message: String,
}

impl HookError {
    /// Error with the default script-failure code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: codes::SCRIPT_FAILED,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<HookError> for ApiError {
    fn from(err: HookError) -> Self {
        ApiError::Hook {
            code: err.code,
            message: err.message,
        }
    }
}
