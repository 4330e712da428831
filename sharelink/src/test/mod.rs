//! End-to-end flows through the full router on the memory-only backend.

use async_trait::async_trait;
use axum::{
    body::BodyDataStream,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use axum_test::multipart::{MultipartForm, Part};
use futures::StreamExt;
use serde_json::json;
use std::{sync::Arc, time::Duration};

use crate::{
    api::{
        handlers::files::file_events,
        models::files::{FileListResponse, FileResponse},
    },
    auth::current_user::CurrentIdentity,
    backend::{
        Backend,
        errors::{BackendError, Result as BackendResult},
        identity::{Account, Identity, IdentityService},
    },
    test_utils::{TEST_PASSWORD, create_test_app, create_test_config, create_test_server, create_test_state, sign_up_cookie},
    types::UserId,
};

const REPORT_SIZE: usize = 2_400_000;

fn report() -> Vec<u8> {
    (0..REPORT_SIZE).map(|i| (i % 251) as u8).collect()
}

fn path_of(url: &str) -> String {
    url::Url::parse(url).unwrap().path().to_string()
}

#[test_log::test(tokio::test)]
async fn test_upload_list_share_and_fetch() {
    let (server, _runtime) = create_test_app().await;
    let cookie = sign_up_cookie(&server, "u1@example.com").await;

    let form = MultipartForm::new().add_part("file", Part::bytes(report()).file_name("report.pdf").mime_type("application/pdf"));
    let response = server.post("/api/v1/files").add_header("cookie", &cookie).multipart(form).await;
    response.assert_status(StatusCode::CREATED);
    let uploaded: FileResponse = response.json();

    let list: FileListResponse = server.get("/api/v1/files").add_header("cookie", &cookie).await.json();
    assert_eq!(list.data.len(), 1);
    let file = &list.data[0];
    assert_eq!(file.id, uploaded.id);
    assert_eq!(file.name, "report.pdf");
    assert_eq!(file.size, "2.29 MB");
    assert_eq!(file.size_bytes, REPORT_SIZE as u64);
    assert_eq!(file.category, "pdf");
    assert_eq!(file.download_count, 0);
    assert!(file.share_url.ends_with(&format!("/file/{}", file.id)));

    let bytes = server.get(&path_of(&file.public_url)).await;
    bytes.assert_status_ok();
    assert_eq!(bytes.as_bytes().as_ref(), report().as_slice());

    let dashboard = server.get("/dashboard").add_header("cookie", &cookie).await;
    dashboard.assert_status_ok();
    assert!(dashboard.text().contains("report.pdf"));
    assert!(dashboard.text().contains("2.29 MB"));
}

#[tokio::test]
async fn test_share_page_counts_views() {
    let (server, _runtime) = create_test_app().await;
    let cookie = sign_up_cookie(&server, "u1@example.com").await;

    let form = MultipartForm::new().add_part("file", Part::bytes(b"hello".to_vec()).file_name("notes.txt").mime_type("text/plain"));
    let uploaded: FileResponse = server
        .post("/api/v1/files")
        .add_header("cookie", &cookie)
        .multipart(form)
        .await
        .json();

    let page = server.get(&format!("/file/{}", uploaded.id)).await;
    page.assert_status_ok();
    assert!(page.text().contains("notes.txt"));

    // Views are counted without a session
    server.get(&format!("/file/{}", uploaded.id)).await.assert_status_ok();

    let list: FileListResponse = server.get("/api/v1/files").add_header("cookie", &cookie).await.json();
    assert_eq!(list.data[0].download_count, 2);

    let download = server.get(&format!("/file/{}/download", uploaded.id)).await;
    download.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(download.header(header::LOCATION), uploaded.public_url.as_str());

    let list: FileListResponse = server.get("/api/v1/files").add_header("cookie", &cookie).await.json();
    assert_eq!(list.data[0].download_count, 2);
}

#[tokio::test]
async fn test_unknown_share_link_shows_not_found_page() {
    let (server, _runtime) = create_test_app().await;

    let response = server.get("/file/does-not-exist").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let html = response.text();
    assert!(html.contains("File Not Found"));
    assert!(html.contains(r#"href="/""#));

    server.get("/file/does-not-exist/download").await.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard_redirects_when_signed_out() {
    let (server, _runtime) = create_test_app().await;

    let response = server.get("/dashboard").await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
    assert!(!response.text().contains("Your files"));
}

#[tokio::test]
async fn test_sign_out_then_dashboard_redirects() {
    let (server, _runtime) = create_test_app().await;
    let cookie = sign_up_cookie(&server, "u1@example.com").await;

    server.get("/dashboard").add_header("cookie", &cookie).await.assert_status_ok();

    let signed_out = server.post("/api/v1/auth/sign-out").add_header("cookie", &cookie).await;
    signed_out.assert_status_ok();
    let cleared = signed_out.cookie("sharelink_session");
    assert_eq!(cleared.value(), "");

    let cleared_cookie = format!("{}={}", cleared.name(), cleared.value());
    let response = server.get("/dashboard").add_header("cookie", &cleared_cookie).await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
}

#[tokio::test]
async fn test_sign_in_from_landing_reaches_dashboard() {
    let (server, _runtime) = create_test_app().await;
    sign_up_cookie(&server, "u1@example.com").await;

    let landing = server.get("/").await;
    landing.assert_status_ok();
    assert!(landing.text().contains("Sign in"));

    let response = server
        .post("/api/v1/auth/sign-in")
        .json(&json!({ "email": "U1@Example.com", "password": TEST_PASSWORD }))
        .await;
    response.assert_status_ok();
    let session = response.cookie("sharelink_session");

    let dashboard = server
        .get("/dashboard")
        .add_header("cookie", &format!("{}={}", session.name(), session.value()))
        .await;
    dashboard.assert_status_ok();
    assert!(dashboard.text().contains("u1"));
}

#[tokio::test]
async fn test_tampered_session_is_signed_out() {
    let (server, _runtime) = create_test_app().await;

    server
        .get("/api/v1/auth/session")
        .add_header("cookie", "sharelink_session=not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/dashboard")
        .add_header("authorization", "Bearer not-a-jwt")
        .await
        .assert_status(StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_api_docs_are_served() {
    let (server, _runtime) = create_test_app().await;

    server.get("/api/docs").await.assert_status_ok();
    let spec: serde_json::Value = server.get("/api/v1/openapi.json").await.json();
    assert!(spec["paths"]["/files"].is_object());
    server.get("/healthz").await.assert_status_ok();
}

/// Accounts resolve by email but never by id, so every session restore fails
struct UnreachableIdentities(Arc<dyn IdentityService>);

#[async_trait]
impl IdentityService for UnreachableIdentities {
    async fn insert_account(&self, account: Account) -> BackendResult<Account> {
        self.0.insert_account(account).await
    }

    async fn find_account_by_email(&self, email: &str) -> BackendResult<Option<Account>> {
        self.0.find_account_by_email(email).await
    }

    async fn get_identity(&self, _id: UserId) -> BackendResult<Option<Identity>> {
        Err(BackendError::Other(anyhow::anyhow!("identity backend unreachable")))
    }
}

#[tokio::test]
async fn test_unresolved_session_shows_loading_page() {
    let mut backend = Backend::in_memory(&create_test_config().public_base_url);
    backend.identity = Arc::new(UnreachableIdentities(backend.identity.clone()));
    let server = create_test_server(&create_test_state(backend));
    let cookie = sign_up_cookie(&server, "u1@example.com").await;

    let response = server.get("/dashboard").add_header("cookie", &cookie).await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.header(header::RETRY_AFTER), "1");
    assert!(response.headers().get(header::LOCATION).is_none());
    assert!(!response.text().contains("Your files"));
}

/// Reads `text/event-stream` bodies one event at a time
struct EventReader {
    body: BodyDataStream,
    buffer: String,
}

impl EventReader {
    /// Next event as (name, data), skipping keep-alive comments
    async fn next(&mut self) -> (String, String) {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let mut name = String::new();
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(value) = line.strip_prefix("event: ") {
                        name = value.to_string();
                    } else if let Some(value) = line.strip_prefix("data: ") {
                        data.push_str(value);
                    }
                }
                if name.is_empty() && data.is_empty() {
                    continue;
                }
                return (name, data);
            }

            let chunk = tokio::time::timeout(Duration::from_secs(5), self.body.next())
                .await
                .expect("timed out waiting for an event")
                .expect("event stream ended")
                .expect("event stream failed");
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }
}

#[tokio::test]
async fn test_file_events_follow_owner_uploads() {
    let state = create_test_state(Backend::in_memory(&create_test_config().public_base_url));
    let server = create_test_server(&state);
    let u1_cookie = sign_up_cookie(&server, "u1@example.com").await;
    let u2_cookie = sign_up_cookie(&server, "u2@example.com").await;

    let upload = |cookie: String, name: &'static str| {
        let form = MultipartForm::new().add_part("file", Part::bytes(b"hello".to_vec()).file_name(name).mime_type("text/plain"));
        let request = server.post("/api/v1/files").add_header("cookie", &cookie).multipart(form);
        async move {
            let response = request.await;
            response.assert_status(StatusCode::CREATED);
            response.json::<FileResponse>()
        }
    };

    let existing = upload(u1_cookie.clone(), "existing.txt").await;

    let account = state
        .backend
        .identity
        .find_account_by_email("u1@example.com")
        .await
        .unwrap()
        .unwrap();
    let response = file_events(State(state.clone()), CurrentIdentity(account.into()))
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let mut events = EventReader {
        body: response.into_body().into_data_stream(),
        buffer: String::new(),
    };

    let (name, data) = events.next().await;
    assert_eq!(name, "snapshot");
    let snapshot: FileListResponse = serde_json::from_str(&data).unwrap();
    assert_eq!(snapshot.data.len(), 1);
    assert_eq!(snapshot.data[0].id, existing.id);

    // Another owner's upload produces nothing, so the next event is u1's own upload
    upload(u2_cookie, "foreign.txt").await;
    let mine = upload(u1_cookie, "notes.txt").await;

    let (name, data) = events.next().await;
    assert_eq!(name, "file_inserted");
    let inserted: FileResponse = serde_json::from_str(&data).unwrap();
    assert_eq!(inserted.id, mine.id);
    assert_eq!(inserted.name, "notes.txt");
}
