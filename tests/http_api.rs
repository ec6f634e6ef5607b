//! HTTP status codes and body shapes through the router

use std::sync::Arc;

use aerobase::config::AppConfig;
use aerobase::http::{api_routes, APPLICATION_ID_HEADER, CLIENT_KEY_HEADER, SESSION_TOKEN_HEADER};
use aerobase::rest::RestService;
use aerobase::store::MemoryStore;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn router() -> Router {
    let rest = RestService::new(
        AppConfig::new("app", "master", "client"),
        Arc::new(MemoryStore::new()),
    );
    api_routes(rest)
}

fn request(method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(APPLICATION_ID_HEADER, "app")
        .header(CLIENT_KEY_HEADER, "client");
    if let Some(token) = token {
        builder = builder.header(SESSION_TOKEN_HEADER, token);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, location)
}

#[tokio::test]
async fn test_object_lifecycle_over_http() {
    let router = router();

    let (status, created, location) = send(
        &router,
        request(Method::POST, "/classes/GameScore", Some(json!({"score": 10})), None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["objectId"].as_str().unwrap().to_string();
    assert_eq!(
        location.as_deref(),
        Some(format!("http://localhost:1337/classes/GameScore/{}", id).as_str())
    );

    let uri = format!("/classes/GameScore/{}", id);
    let (status, object, _) = send(&router, request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(object["score"], 10);

    let (status, updated, _) = send(
        &router,
        request(
            Method::PUT,
            &uri,
            Some(json!({"score": {"__op": "Increment", "amount": 5}})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["score"], 15);

    let (status, found, _) = send(
        &router,
        request(
            Method::GET,
            "/classes/GameScore?where=%7B%22score%22%3A15%7D&count=1",
            None,
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["results"].as_array().unwrap().len(), 1);
    assert_eq!(found["count"], 1);

    let (status, body, _) = send(&router, request(Method::DELETE, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body, _) = send(&router, request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 101);
    assert_eq!(body["error"], "Object not found.");
}

#[tokio::test]
async fn test_missing_keys_are_forbidden() {
    let router = router();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/classes/GameScore")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_bad_where_is_invalid_json() {
    let router = router();
    let (status, body, _) = send(
        &router,
        request(Method::GET, "/classes/GameScore?where=%7Bbad", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 107);
}

#[tokio::test]
async fn test_signup_login_me_logout() {
    let router = router();

    let (status, user, _) = send(
        &router,
        request(
            Method::POST,
            "/users",
            Some(json!({"username": "hana", "password": "pw"})),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(user["sessionToken"].is_string());

    let (status, login, _) = send(
        &router,
        request(Method::GET, "/login?username=hana&password=pw", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = login["sessionToken"].as_str().unwrap().to_string();

    let (status, me, _) = send(&router, request(Method::GET, "/users/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "hana");

    let (status, body, _) = send(&router, request(Method::POST, "/logout", None, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body, _) = send(&router, request(Method::GET, "/users/me", None, Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 209);
}

#[tokio::test]
async fn test_health() {
    let router = router();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
