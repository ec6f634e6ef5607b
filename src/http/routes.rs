//! Object API HTTP Routes
//!
//! `/classes/:class_name` plus the system-class aliases `/users`,
//! `/sessions` and `/roles`, and the login/logout/me endpoints.

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use super::request::RequestInfo;
use crate::auth::Auth;
use crate::errors::{ApiError, ApiResult};
use crate::query::QueryOptions;
use crate::rest::RestService;
use crate::schema::{ROLE_CLASS, SESSION_CLASS, USER_CLASS};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Build the object API router
pub fn api_routes(rest: RestService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/classes", any(method_not_allowed))
        .route("/classes/:class_name", post(create_handler).get(find_handler))
        .route(
            "/classes/:class_name/:object_id",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/users/me", get(me_handler))
        .route("/users", post(create_user).get(find_users))
        .route(
            "/users/:object_id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/sessions", post(create_session).get(find_sessions))
        .route(
            "/sessions/:object_id",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/roles", post(create_role).get(find_roles))
        .route(
            "/roles/:object_id",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route("/login", get(login_query_handler).post(login_body_handler))
        .route("/logout", post(logout_handler))
        .with_state(rest)
}

// ==================
// Shared Steps
// ==================

/// Extract credentials and resolve the caller
async fn authenticate(
    rest: &RestService,
    headers: &HeaderMap,
    body: &[u8],
    ignore_session: bool,
) -> ApiResult<(Auth, RequestInfo)> {
    let info = RequestInfo::from_parts(headers, body)?;
    let auth = rest.authenticate(&info.credentials, ignore_session).await?;
    Ok((auth, info))
}

fn parse_where(params: &HashMap<String, String>) -> ApiResult<Option<Value>> {
    match params.get("where") {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
            .map(Some)
            .map_err(|_| ApiError::InvalidJson("where should be valid json".to_string())),
        _ => Ok(None),
    }
}

async fn do_create(
    rest: &RestService,
    class_name: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<Response> {
    let (auth, info) = authenticate(rest, headers, body, false).await?;
    let created = rest
        .create(&auth, class_name, info.body, info.client_sdk.as_ref())
        .await?;
    if !created.created {
        return Ok((StatusCode::OK, Json(created.response)).into_response());
    }
    let mut response = (StatusCode::CREATED, Json(created.response)).into_response();
    if let Ok(location) = HeaderValue::from_str(&created.location) {
        response.headers_mut().insert(LOCATION, location);
    }
    Ok(response)
}

async fn do_find(
    rest: &RestService,
    class_name: &str,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let (auth, info) = authenticate(rest, headers, body, false).await?;
    let where_ = parse_where(params)?;
    let options = QueryOptions::from_params(params)?;
    let found = rest
        .find(
            &auth,
            class_name,
            where_.as_ref(),
            options,
            info.client_sdk.as_ref(),
        )
        .await?;
    Ok(Json(found.to_json()))
}

async fn do_get(
    rest: &RestService,
    class_name: &str,
    object_id: &str,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let (auth, info) = authenticate(rest, headers, body, false).await?;
    // Only projection and include apply to a single-object read
    let parsed = QueryOptions::from_params(params)?;
    let options = QueryOptions {
        keys: parsed.keys,
        include: parsed.include,
        ..Default::default()
    };
    let object = rest
        .get(&auth, class_name, object_id, options, info.client_sdk.as_ref())
        .await?;
    Ok(Json(object))
}

async fn do_update(
    rest: &RestService,
    class_name: &str,
    object_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let (auth, info) = authenticate(rest, headers, body, false).await?;
    let updated = rest
        .update(
            &auth,
            class_name,
            object_id,
            info.body,
            info.client_sdk.as_ref(),
        )
        .await?;
    Ok(Json(updated))
}

async fn do_delete(
    rest: &RestService,
    class_name: &str,
    object_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> ApiResult<Json<Value>> {
    let (auth, info) = authenticate(rest, headers, body, false).await?;
    rest.delete(&auth, class_name, object_id, info.client_sdk.as_ref())
        .await?;
    Ok(Json(json!({})))
}

// ==================
// Handlers
// ==================

async fn health_handler() -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (StatusCode::OK, Json(response))
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "a class name is required"})),
    )
}

async fn create_handler(
    State(rest): State<RestService>,
    Path(class_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    do_create(&rest, &class_name, &headers, &body).await
}

async fn find_handler(
    State(rest): State<RestService>,
    Path(class_name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    do_find(&rest, &class_name, &headers, &params, &body).await
}

async fn get_handler(
    State(rest): State<RestService>,
    Path((class_name, object_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    do_get(&rest, &class_name, &object_id, &headers, &params, &body).await
}

async fn update_handler(
    State(rest): State<RestService>,
    Path((class_name, object_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    do_update(&rest, &class_name, &object_id, &headers, &body).await
}

async fn delete_handler(
    State(rest): State<RestService>,
    Path((class_name, object_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    do_delete(&rest, &class_name, &object_id, &headers, &body).await
}

/// Handlers for a system class mounted at its own path
macro_rules! system_class_handlers {
    ($class:expr, $create:ident, $find:ident, $get:ident, $update:ident, $delete:ident) => {
        async fn $create(
            State(rest): State<RestService>,
            headers: HeaderMap,
            body: Bytes,
        ) -> ApiResult<Response> {
            do_create(&rest, $class, &headers, &body).await
        }

        async fn $find(
            State(rest): State<RestService>,
            Query(params): Query<HashMap<String, String>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> ApiResult<Json<Value>> {
            do_find(&rest, $class, &headers, &params, &body).await
        }

        async fn $get(
            State(rest): State<RestService>,
            Path(object_id): Path<String>,
            Query(params): Query<HashMap<String, String>>,
            headers: HeaderMap,
            body: Bytes,
        ) -> ApiResult<Json<Value>> {
            do_get(&rest, $class, &object_id, &headers, &params, &body).await
        }

        async fn $update(
            State(rest): State<RestService>,
            Path(object_id): Path<String>,
            headers: HeaderMap,
            body: Bytes,
        ) -> ApiResult<Json<Value>> {
            do_update(&rest, $class, &object_id, &headers, &body).await
        }

        async fn $delete(
            State(rest): State<RestService>,
            Path(object_id): Path<String>,
            headers: HeaderMap,
            body: Bytes,
        ) -> ApiResult<Json<Value>> {
            do_delete(&rest, $class, &object_id, &headers, &body).await
        }
    };
}

system_class_handlers!(USER_CLASS, create_user, find_users, get_user, update_user, delete_user);
system_class_handlers!(
    SESSION_CLASS,
    create_session,
    find_sessions,
    get_session,
    update_session,
    delete_session
);
system_class_handlers!(ROLE_CLASS, create_role, find_roles, get_role, update_role, delete_role);

async fn me_handler(
    State(rest): State<RestService>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let (auth, _) = authenticate(&rest, &headers, &body, false).await?;
    Ok(Json(rest.me(&auth).await?))
}

async fn login_query_handler(
    State(rest): State<RestService>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let (auth, _) = authenticate(&rest, &headers, &body, true).await?;
    let user = rest
        .login(
            &auth,
            params.get("username").map(String::as_str),
            params.get("password").map(String::as_str),
        )
        .await?;
    Ok(Json(user))
}

async fn login_body_handler(
    State(rest): State<RestService>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let (auth, info) = authenticate(&rest, &headers, &body, true).await?;
    let user = rest
        .login(
            &auth,
            info.body.get("username").and_then(Value::as_str),
            info.body.get("password").and_then(Value::as_str),
        )
        .await?;
    Ok(Json(user))
}

async fn logout_handler(
    State(rest): State<RestService>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let (auth, _) = authenticate(&rest, &headers, &body, false).await?;
    rest.logout(&auth).await?;
    Ok(Json(json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
    }

    #[test]
    fn test_where_must_be_json() {
        let mut params = HashMap::new();
        params.insert("where".to_string(), "{bad".to_string());
        assert_eq!(
            parse_where(&params).unwrap_err(),
            ApiError::InvalidJson("where should be valid json".into())
        );

        params.insert("where".to_string(), "{\"a\": 1}".to_string());
        assert_eq!(parse_where(&params).unwrap(), Some(json!({"a": 1})));
    }
}
