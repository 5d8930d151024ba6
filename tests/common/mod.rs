//! Shared helpers for HTTP-level tests.

use axum::http::{header, HeaderValue};
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};
use teamflow::{
    app::build_app,
    config::{AppConfig, AuthPolicy, JwtConfig},
    state::AppState,
};

#[allow(dead_code)]
pub fn test_config(auth: AuthPolicy) -> AppConfig {
    AppConfig {
        database_url: None,
        jwt: JwtConfig {
            secret: "integration-secret".into(),
            issuer: "teamflow-test".into(),
            audience: "teamflow-test-users".into(),
            ttl_minutes: 5,
            refresh_ttl_minutes: 60,
        },
        auth,
        cors_origin: None,
    }
}

/// Server over a fresh in-memory store; every test gets its own.
#[allow(dead_code)]
pub fn server_with(auth: AuthPolicy) -> (TestServer, AppState) {
    let state = AppState::in_memory(test_config(auth));
    let app = build_app(state.clone()).expect("build app");
    let server = TestServer::new(app).expect("Failed to create test server");
    (server, state)
}

#[allow(dead_code)]
pub fn server() -> TestServer {
    server_with(AuthPolicy::default()).0
}

#[allow(dead_code)]
pub fn bearer(request: TestRequest, token: &str) -> TestRequest {
    request.add_header(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
    )
}

/// Signs up and returns the response body.
#[allow(dead_code)]
pub async fn signup(server: &TestServer, name: &str, email: &str, password: &str) -> Value {
    let response = server
        .post("/api/auth/signup")
        .json(&json!({ "name": name, "email": email, "password": password }))
        .await;
    assert_eq!(response.status_code(), 201, "signup failed: {}", response.text());
    response.json()
}

/// Logs in and returns the response body.
#[allow(dead_code)]
pub async fn login(server: &TestServer, email: &str, password: &str) -> Value {
    let response = server
        .post("/api/auth/login")
        .json(&json!({ "email": email, "password": password }))
        .await;
    assert_eq!(response.status_code(), 200, "login failed: {}", response.text());
    response.json()
}
