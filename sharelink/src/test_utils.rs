//! Shared helpers for unit and end-to-end tests.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use std::sync::Arc;

use crate::{
    AppState,
    backend::{Backend, BackendRuntime},
    build_router,
    config::{Config, PasswordConfig, SessionConfig},
    pages::Pages,
};

pub const TEST_PASSWORD: &str = "correct horse";

pub fn create_test_config() -> Config {
    let mut config = Config {
        secret_key: Some("test-secret-key-for-sessions".to_string()),
        ..Default::default()
    };

    config.auth.session = SessionConfig {
        // The test server speaks plain HTTP
        cookie_secure: false,
        ..Default::default()
    };
    config.auth.password = PasswordConfig {
        argon2_memory_kib: 128,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        ..Default::default()
    };
    config.limits.max_file_size = 4 * 1024 * 1024;

    config
}

/// Application on the memory-only local backend
pub async fn create_test_app() -> (TestServer, BackendRuntime) {
    let app = crate::Application::new(create_test_config())
        .await
        .expect("Failed to create application");
    app.into_test_server()
}

/// Application state over `backend`, for tests that need to swap a port or call handlers directly
pub fn create_test_state(backend: Backend) -> AppState {
    AppState::builder()
        .config(create_test_config())
        .backend(backend)
        .pages(Arc::new(Pages::new().expect("Failed to compile templates")))
        .build()
}

/// Full router over an existing state
pub fn create_test_server(state: &AppState) -> TestServer {
    let router = build_router(state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

/// Sign up `email` and return a `Cookie` header value carrying its session
pub async fn sign_up_cookie(server: &TestServer, email: &str) -> String {
    let response = server
        .post("/api/v1/auth/sign-up")
        .json(&json!({ "email": email, "password": TEST_PASSWORD }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let cookie = response.cookie(&create_test_config().auth.session.cookie_name);
    format!("{}={}", cookie.name(), cookie.value())
}
