//! Axum middleware tests

#![cfg(feature = "http")]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    middleware::from_fn_with_state,
    routing::{delete, get},
    Router,
};
use routegate_authz::{
    http::{authorize_request, Rejection},
    role::{InMemoryRoleStore, Role},
    rule::{InMemoryRuleStore, Rule},
    types::Principal,
    AuthzEngine, EngineConfig,
};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> Router {
    let roles = InMemoryRoleStore::with_roles([
        Role::new(1, "super_admin").system(),
        Role::new(2, "editor"),
        Role::new(3, "viewer"),
    ]);
    let engine = Arc::new(AuthzEngine::preloaded(
        EngineConfig::default(),
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(roles),
        vec![
            Rule::public("GET", "/health"),
            Rule::allow("GET", "/users/*", [2, 3]),
            Rule::forbid("DELETE", "/users/*", [3]),
            Rule::allow("DELETE", "/*/*", [2]),
        ],
    ));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users/:id", get(|| async { "user" }).delete(|| async { "deleted" }))
        .route("/admin", delete(|| async { "wiped" }))
        .layer(from_fn_with_state(engine, authorize_request))
}

fn request(method: &str, uri: &str, principal: Option<Principal>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(principal) = principal {
        builder = builder.extension(principal);
    }
    builder.body(Body::empty()).unwrap()
}

async fn rejection(response: axum::response::Response) -> Rejection {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_public_route_passes_through() {
    let response = app().oneshot(request("GET", "/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_anonymous_gets_401() {
    let response = app().oneshot(request("GET", "/users/7", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = rejection(response).await;
    assert_eq!(body.error, "authentication_required");
    assert_eq!(body.method, "GET");
    assert_eq!(body.path, "/users/7");
}

#[tokio::test]
async fn test_allowed_principal_reaches_handler() {
    let viewer = Principal::new("alice").with_roles([3]);
    let response = app()
        .oneshot(request("GET", "/users/7", Some(viewer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"user");
}

#[tokio::test]
async fn test_forbidden_gets_403() {
    let viewer = Principal::new("alice").with_roles([3]);
    let response = app()
        .oneshot(request("DELETE", "/users/7", Some(viewer)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = rejection(response).await;
    assert_eq!(body.error, "forbidden");
    assert!(body.reason.contains("DELETE|/users/*"));
}

#[tokio::test]
async fn test_route_without_rule_gets_403() {
    let editor = Principal::new("bob").with_roles([2]);
    let response = app()
        .oneshot(request("DELETE", "/admin", Some(editor)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(rejection(response).await.error, "no_rule_found");
}

#[tokio::test]
async fn test_role_context_header() {
    let principal = Principal::new("carol").with_roles([2, 3]);

    let mut as_viewer = request("DELETE", "/users/7", Some(principal.clone()));
    as_viewer
        .headers_mut()
        .insert("X-Role-Context", "viewer".parse().unwrap());
    let response = app().oneshot(as_viewer).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut as_editor = request("DELETE", "/users/7", Some(principal.clone()));
    as_editor
        .headers_mut()
        .insert("X-Role-Context", "editor".parse().unwrap());
    let response = app().oneshot(as_editor).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut unknown = request("DELETE", "/users/7", Some(principal));
    unknown
        .headers_mut()
        .insert("X-Role-Context", "ghost".parse().unwrap());
    let response = app().oneshot(unknown).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(rejection(response).await.error, "unknown_role_context");
}
