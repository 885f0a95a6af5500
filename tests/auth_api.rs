use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use sessiongate::{
    config::Config,
    crypto::{
        aes::SecureKey,
        token::TokenCodec,
    },
    repositories::memory::{MemorySessionStore, MemoryUserDirectory},
    routes,
    state::AppState,
};

const PASSWORD: &str = "P@ss1234";

struct TestApp {
    router: Router,
    sessions: MemorySessionStore,
    codec: TokenCodec,
}

fn config(rotate_refresh_tokens: bool) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        database_pool_size: 1,
        http_addr: "127.0.0.1:0".parse().unwrap(),
        token_key: SecureKey::new([7; 32]),
        access_token_ttl: Duration::hours(1),
        refresh_token_ttl: Duration::hours(24),
        rotate_refresh_tokens,
        cookie_domain: "localhost".to_string(),
        cookie_secure: false,
        trust_forwarded_for: false,
        cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        auth_rate_limit: None,
    }
}

fn app_with(rotate_refresh_tokens: bool) -> TestApp {
    let config = config(rotate_refresh_tokens);
    let sessions = MemorySessionStore::new();
    let users = MemoryUserDirectory::new();
    let state = AppState::with_stores(&config, Arc::new(sessions.clone()), Arc::new(users));

    TestApp {
        router: routes::router(state).unwrap(),
        sessions,
        codec: TokenCodec::new(config.token_key.clone()),
    }
}

fn app() -> TestApp {
    app_with(false)
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "integration-test")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_token(method: &str, uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, authorization)
        .body(Body::empty())
        .unwrap()
}

async fn register(app: &TestApp, username: &str) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/auth/register",
            json!({
                "username": username,
                "email": format!("{}@example.com", username),
                "name": "Test User",
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    body
}

async fn login(app: &TestApp, username: &str) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/auth/login",
            json!({ "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body
}

fn bearer(token: &Value) -> String {
    format!("Bearer {}", token.as_str().unwrap())
}

#[tokio::test]
async fn health_is_public() {
    let app = app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = app();
    let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn register_returns_created_user_id() {
    let app = app();
    let body = register(&app, "alice").await;
    assert!(body["created_user_id"].is_string());
    assert_eq!(app.sessions.live_count().await, 0);
}

#[tokio::test]
async fn register_rejects_duplicates_and_mismatched_passwords() {
    let app = app();
    register(&app, "alice").await;

    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            json!({
                "username": "alice",
                "email": "other@example.com",
                "name": "Alice Again",
                "password": PASSWORD,
                "confirm_password": PASSWORD,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);

    let (status, _) = send(
        &app,
        post_json(
            "/auth/register",
            json!({
                "username": "bob",
                "email": "bob@example.com",
                "name": "Bob",
                "password": PASSWORD,
                "confirm_password": "P@ss12345",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn register_validates_input() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json(
            "/auth/register",
            json!({
                "username": "a b",
                "email": "not-an-email",
                "name": "X",
                "password": "weak",
                "confirm_password": "weak",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn login_issues_tokens_and_records_session() {
    let app = app();
    register(&app, "alice").await;

    let request = post_json(
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
    );
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies: Vec<String> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("access_token=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=") && c.contains("HttpOnly")));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["user"].get("password_hash").is_none());
    assert_eq!(body["access_token_expires_in"], 3600);
    assert_eq!(body["refresh_token_expires_in"], 86400);

    let session_id = body["login_session_id"].as_i64().unwrap();
    let session = app.sessions.find_including_deleted(session_id).await.unwrap();
    assert_eq!(session.access_token, body["access_token"].as_str().unwrap());
    assert_eq!(session.refresh_token, body["refresh_token"].as_str().unwrap());
    assert_eq!(session.user_agent, "integration-test");
    assert!(session.deleted_at.is_none());
}

#[tokio::test]
async fn spoofed_forwarded_for_is_not_recorded() {
    let app = app();
    register(&app, "alice").await;

    let mut request = post_json(
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    let session = app
        .sessions
        .find_including_deleted(body["login_session_id"].as_i64().unwrap())
        .await
        .unwrap();
    assert_eq!(session.client_ip, "unknown");
}

#[tokio::test]
async fn bad_credentials_are_indistinguishable() {
    let app = app();
    register(&app, "alice").await;

    let (wrong_status, wrong_body) = send(
        &app,
        post_json(
            "/auth/login",
            json!({ "username": "alice", "password": "Wrong1234" }),
        ),
    )
    .await;
    let (unknown_status, unknown_body) = send(
        &app,
        post_json(
            "/auth/login",
            json!({ "username": "mallory", "password": PASSWORD }),
        ),
    )
    .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_status, unknown_status);
    assert_eq!(wrong_body, unknown_body);
    assert_eq!(app.sessions.live_count().await, 0);
}

#[tokio::test]
async fn verify_access_token_returns_payload_and_user() {
    let app = app();
    register(&app, "alice").await;
    let login = login(&app, "alice").await;

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", &bearer(&login["access_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["payload"]["user_id"], login["user"]["id"]);
    assert!(body["payload"]["token_id"].is_string());
}

#[tokio::test]
async fn gate_rejects_bad_authorization_headers() {
    let app = app();

    let request = Request::builder()
        .uri("/auth/verify_access_token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authorization is not provided");

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", "Bearer"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid authorization header format");

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", "Basic dXNlcjpwYXNz"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unsupported authorization type");

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", "Bearer v1.local.garbage"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid or expired access token");
}

#[tokio::test]
async fn gate_rejects_expired_tokens() {
    let app = app();
    register(&app, "alice").await;
    let login = login(&app, "alice").await;

    let verified = app
        .codec
        .verify(login["access_token"].as_str().unwrap())
        .unwrap();
    let stale = app
        .codec
        .issue_at(
            &verified,
            Duration::hours(1),
            Utc::now() - Duration::hours(2),
        )
        .unwrap();

    let (status, body) = send(
        &app,
        with_token(
            "GET",
            "/auth/verify_access_token",
            &format!("Bearer {}", stale.token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid or expired access token");
}

#[tokio::test]
async fn refresh_issues_new_access_token_for_same_session() {
    let app = app();
    register(&app, "alice").await;
    let login = login(&app, "alice").await;

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/refresh_token", &bearer(&login["refresh_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "refresh failed: {}", body);
    assert_eq!(body["login_session_id"], login["login_session_id"]);
    assert_ne!(body["access_token"], login["access_token"]);
    assert!(body.get("refresh_token").is_none());

    let session = app
        .sessions
        .find_including_deleted(login["login_session_id"].as_i64().unwrap())
        .await
        .unwrap();
    assert_eq!(session.access_token, body["access_token"].as_str().unwrap());
    assert_eq!(session.refresh_token, login["refresh_token"].as_str().unwrap());
    assert!(session.last_used_at.is_some());

    let (status, _) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", &bearer(&body["access_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn rotated_refresh_token_replaces_the_old_one() {
    let app = app_with(true);
    register(&app, "alice").await;
    let login = login(&app, "alice").await;

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/refresh_token", &bearer(&login["refresh_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["refresh_token"].is_string());
    assert_eq!(body["refresh_token_expires_in"], 86400);

    let (status, body) = send(
        &app,
        with_token("GET", "/auth/refresh_token", &bearer(&login["refresh_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid or revoked refresh token, please log in again");
}

#[tokio::test]
async fn refresh_requires_bearer_header() {
    let app = app();
    let request = Request::builder()
        .uri("/auth/refresh_token")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authorization is not provided");
}

#[tokio::test]
async fn logout_ends_the_session() {
    let app = app();
    register(&app, "alice").await;
    let login = login(&app, "alice").await;
    let access = bearer(&login["access_token"]);

    let (status, body) = send(&app, with_token("DELETE", "/auth/logout", &access)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let session = app
        .sessions
        .find_including_deleted(login["login_session_id"].as_i64().unwrap())
        .await
        .unwrap();
    assert!(session.deleted_at.is_some());
    assert_eq!(app.sessions.live_count().await, 0);

    let (status, _) = send(&app, with_token("GET", "/auth/verify_access_token", &access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        with_token("GET", "/auth/refresh_token", &bearer(&login["refresh_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, with_token("DELETE", "/auth/logout", &access)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_leaves_other_sessions_alone() {
    let app = app();
    register(&app, "alice").await;
    let first = login(&app, "alice").await;
    let second = login(&app, "alice").await;
    assert_ne!(first["login_session_id"], second["login_session_id"]);

    let (status, _) = send(
        &app,
        with_token("DELETE", "/auth/logout", &bearer(&first["access_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        with_token("GET", "/auth/verify_access_token", &bearer(&second["access_token"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.sessions.live_count().await, 1);
}
