//! # API Errors
//!
//! Error taxonomy shared by the resolver, the orchestrators and the HTTP layer.
//! Every variant maps to a stable numeric code and an HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Numeric error codes carried on the wire
pub mod codes {
    pub const INTERNAL_SERVER_ERROR: i32 = 1;
    pub const OBJECT_NOT_FOUND: i32 = 101;
    pub const INVALID_QUERY: i32 = 102;
    pub const INVALID_CLASS_NAME: i32 = 103;
    pub const INVALID_KEY_NAME: i32 = 105;
    pub const INVALID_JSON: i32 = 107;
    pub const INCORRECT_TYPE: i32 = 111;
    pub const OPERATION_FORBIDDEN: i32 = 119;
    pub const INVALID_ACL: i32 = 123;
    pub const TIMEOUT: i32 = 124;
    pub const DUPLICATE_VALUE: i32 = 137;
    pub const SCRIPT_FAILED: i32 = 141;
    pub const USERNAME_MISSING: i32 = 200;
    pub const PASSWORD_MISSING: i32 = 201;
    pub const USERNAME_TAKEN: i32 = 202;
    pub const INVALID_SESSION_TOKEN: i32 = 209;
    pub const UNSUPPORTED_SERVICE: i32 = 252;
    pub const UNAUTHORIZED: i32 = 403;
}

/// API errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    // ==================
    // Credential Errors
    // ==================
    /// Application id or client key did not match
    #[error("unauthorized")]
    Unauthorized,

    /// Session token unknown or expired
    #[error("Invalid session token")]
    InvalidSessionToken,

    /// Class-level or object-level permission denied
    #[error("{0}")]
    OperationForbidden(String),

    /// Object absent, hidden by ACL, or account locked
    #[error("{0}")]
    ObjectNotFound(String),

    // ==================
    // Client Input Errors
    // ==================
    #[error("{0}")]
    InvalidJson(String),

    #[error("{0}")]
    InvalidQuery(String),

    #[error("{0}")]
    InvalidKeyName(String),

    #[error("{0}")]
    InvalidClassName(String),

    #[error("{0}")]
    InvalidAcl(String),

    /// Value does not match the declared field type
    #[error("{0}")]
    IncorrectType(String),

    /// Uniqueness conflict reported by the store
    #[error("{0}")]
    DuplicateValue(String),

    #[error("bad or missing username")]
    UsernameMissing,

    #[error("password is required")]
    PasswordMissing,

    #[error("Account already exists for this username.")]
    UsernameTaken,

    /// No validator registered for an auth provider
    #[error("This authentication method is unsupported: {0}")]
    UnsupportedService(String),

    // ==================
    // Hook Errors
    // ==================
    /// Error raised by a before-hook, propagated verbatim
    #[error("{message}")]
    Hook { code: i32, message: String },

    // ==================
    // Server Errors
    // ==================
    /// A store call or external verification exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::ObjectNotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::OperationForbidden(msg.into())
    }

    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKeyName(msg.into())
    }

    pub fn incorrect_type(msg: impl Into<String>) -> Self {
        Self::IncorrectType(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable numeric code for this error
    pub fn code(&self) -> i32 {
        match self {
            ApiError::Unauthorized => codes::UNAUTHORIZED,
            ApiError::InvalidSessionToken => codes::INVALID_SESSION_TOKEN,
            ApiError::OperationForbidden(_) => codes::OPERATION_FORBIDDEN,
            ApiError::ObjectNotFound(_) => codes::OBJECT_NOT_FOUND,
            ApiError::InvalidJson(_) => codes::INVALID_JSON,
            ApiError::InvalidQuery(_) => codes::INVALID_QUERY,
            ApiError::InvalidKeyName(_) => codes::INVALID_KEY_NAME,
            ApiError::InvalidClassName(_) => codes::INVALID_CLASS_NAME,
            ApiError::InvalidAcl(_) => codes::INVALID_ACL,
            ApiError::IncorrectType(_) => codes::INCORRECT_TYPE,
            ApiError::DuplicateValue(_) => codes::DUPLICATE_VALUE,
            ApiError::UsernameMissing => codes::USERNAME_MISSING,
            ApiError::PasswordMissing => codes::PASSWORD_MISSING,
            ApiError::UsernameTaken => codes::USERNAME_TAKEN,
            ApiError::UnsupportedService(_) => codes::UNSUPPORTED_SERVICE,
            ApiError::Hook { code, .. } => *code,
            ApiError::Timeout(_) => codes::TIMEOUT,
            ApiError::Internal(_) => codes::INTERNAL_SERVER_ERROR,
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 403 Forbidden
            ApiError::Unauthorized => StatusCode::FORBIDDEN,
            ApiError::OperationForbidden(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            ApiError::ObjectNotFound(_) => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            ApiError::Timeout(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the error was caused by the caller
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub error: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        match err {
            // Credential failures carry no application code
            ApiError::Unauthorized => Self {
                code: None,
                error: err.to_string(),
            },
            _ => Self {
                code: Some(err.code()),
                error: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if !self.is_client_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = Json(ErrorResponse::from(&self));
        (status, body).into_response()
    }
}
