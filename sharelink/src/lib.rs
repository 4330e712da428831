//! # sharelink: upload files and share them with a public link
//!
//! A signed-in owner uploads a file, gets a public link for it, and sees a live list of everything
//! they have uploaded. Anyone holding a link can view the file without an account; every view is
//! counted.
//!
//! ## Architecture
//!
//! - **[`backend`]**: the three ports (identity, objects, metadata) and the `local` and `postgres`
//!   bundles that implement them, chosen once from configuration
//! - **[`session`]**: the per-request [`session::SessionContext`] holding the identity state
//! - **[`auth`]**: passwords, session tokens and cookies, request extractors and the page gate
//! - **[`files`]**: uploader, simulated progress, the owner's live file registry and the public viewer
//! - **[`api`]**: JSON handlers and models, plus the server-rendered pages in [`pages`]
//!
//! ## Routes
//!
//! | Path | What |
//! |------|------|
//! | `/` | Landing page with sign-in and sign-up |
//! | `/dashboard` | Upload form and the owner's files (signed in only) |
//! | `/file/{id}` | Public page for a shared file |
//! | `/file/{id}/download` | Redirect to the file's public URL |
//! | `/objects/{key}` | Object bytes |
//! | `/api/v1/*` | JSON API, documented at `/api/docs` |
//!
//! ## Running
//!
//! ```bash
//! SHARELINK_SECRET_KEY=change-me sharelink -f config.yaml
//! ```
//!
//! Without a database URL the `local` demo backend is used. Setting `DATABASE_URL` switches to
//! PostgreSQL and runs the migrations on startup.

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod files;
pub mod format;
pub mod openapi;
pub mod pages;
pub mod session;
pub mod telemetry;
#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;
pub mod types;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{auth as auth_handlers, files as file_handlers, pages as page_handlers, public},
    auth::middleware::{require_identity, session_layer},
    backend::{Backend, BackendRuntime, create_backend},
    config::CorsOrigin,
    openapi::ApiDoc,
    pages::Pages,
};

pub use config::Config;
pub use types::{FileId, UserId};

/// Room for multipart framing on top of the largest allowed file
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub backend: Backend,
    pub pages: Arc<Pages>,
}

/// Get the sharelink database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router: JSON API, pages, object serving and API docs.
///
/// Every request gets its own session context from [`session_layer`]; `/dashboard` additionally
/// passes through [`require_identity`].
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/auth/sign-up", post(auth_handlers::sign_up))
        .route("/auth/sign-in", post(auth_handlers::sign_in))
        .route("/auth/sign-out", post(auth_handlers::sign_out))
        .route("/auth/session", get(auth_handlers::get_session))
        .route("/files", get(file_handlers::list_files).post(file_handlers::upload_file))
        .route("/files/events", get(file_handlers::file_events))
        .route("/public/files/{id}", get(public::get_public_file))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let gated_pages = Router::new()
        .route("/dashboard", get(page_handlers::dashboard))
        .route_layer(from_fn_with_state(state.clone(), require_identity));

    let body_limit = state.config.limits.max_file_size.saturating_add(MULTIPART_OVERHEAD_BYTES);

    let mut router = Router::new()
        .route("/", get(page_handlers::landing))
        .route("/file/{id}", get(page_handlers::file_page))
        .route("/file/{id}/download", get(page_handlers::download))
        .route("/objects/{*key}", get(public::serve_object))
        .route("/healthz", get(page_handlers::healthz))
        .merge(gated_pages)
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .layer(from_fn_with_state(state.clone(), session_layer))
        .with_state(state.clone())
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    if !state.config.auth.security.cors.allowed_origins.is_empty() {
        router = router.layer(create_cors_layer(&state.config)?);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The composed application: router plus the backend resources it owns.
///
/// [`Application::new`] selects and initializes the backend (running migrations for postgres),
/// [`Application::serve`] binds and serves until the shutdown future resolves, then stops the
/// backend's background tasks and closes its connections.
pub struct Application {
    router: Router,
    config: Config,
    runtime: BackendRuntime,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!(bind_address = %config.bind_address(), public_base_url = %config.public_base_url, "Starting sharelink");

        let (backend, runtime) = create_backend(&config).await?;
        let pages = Arc::new(Pages::new()?);

        let app_state = AppState::builder().config(config.clone()).backend(backend).pages(pages).build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config, runtime })
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackendRuntime) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.runtime)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Sharelink listening on http://{}, links point at {}",
            bind_addr, self.config.public_base_url
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.runtime.shutdown().await;

        Ok(())
    }
}
