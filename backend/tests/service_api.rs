use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use gatehouse_backend::docs::ApiDoc;
use serde_json::Value;
use tower::ServiceExt;
use utoipa::OpenApi;

mod support;

use support::{peer, spawn_app, Client};

#[test]
fn openapi_lists_auth_and_realtime_paths() {
    let json = serde_json::to_value(ApiDoc::openapi()).expect("serialize openapi");
    let paths = json
        .get("paths")
        .and_then(Value::as_object)
        .expect("paths object");
    for path in [
        "/api/auth/login",
        "/api/auth/2fa/verify",
        "/api/auth/2fa/setup",
        "/api/auth/session",
        "/api/ws",
        "/api/health",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }

    let scheme = json
        .pointer("/components/securitySchemes/SessionCookie")
        .expect("session cookie scheme");
    assert_eq!(scheme.get("in").and_then(Value::as_str), Some("cookie"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = spawn_app();
    let mut client = Client::new(peer(150));

    let response = client.get(&app, "/api-docs/openapi.json").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body["paths"]["/api/auth/login"].is_object());
}

#[tokio::test]
async fn responses_echo_or_mint_request_ids() {
    let app = spawn_app();
    let mut client = Client::new(peer(151));

    let response = client.get(&app, "/api/health").await;
    let minted = response
        .headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("request id header");
    assert_eq!(minted.len(), 36);

    let request = Request::builder()
        .uri("/api/health")
        .header("x-request-id", "trace-abc-123")
        .body(Body::empty())
        .expect("build request");
    let response = app.router.clone().oneshot(request).await.expect("call router");
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("trace-abc-123")
    );
}

#[tokio::test]
async fn health_reports_rooms_and_connections() {
    let app = spawn_app();
    let mut client = Client::new(peer(152));

    let response = client.get(&app, "/api/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["connections"], 0);
    let rooms: Vec<&str> = response.body["rooms"]
        .as_array()
        .expect("rooms")
        .iter()
        .filter_map(|room| room["name"].as_str())
        .collect();
    assert_eq!(rooms, vec!["lobby", "members", "editors", "admins"]);
}

#[tokio::test]
async fn error_bodies_carry_a_code() {
    let app = spawn_app();
    let mut client = Client::new(peer(153));

    let response = client
        .post(
            &app,
            "/api/auth/login",
            serde_json::json!({ "email": "x", "password": "" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["code"], "VALIDATION_ERROR");
}
