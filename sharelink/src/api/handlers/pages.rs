//! Server-rendered pages. `/dashboard` sits behind [`crate::auth::middleware::require_identity`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};

use crate::{
    AppState,
    api::models::files::FileResponse,
    auth::current_user::{CurrentIdentity, Session},
    errors::Error,
    files::{
        registry::FileRegistry,
        viewer::{PublicViewer, ViewOutcome},
    },
    format::format_file_size,
};

/// Landing page with the sign-in and sign-up forms
#[tracing::instrument(skip_all)]
pub async fn landing(State(state): State<AppState>, Session(ctx): Session) -> Result<Html<String>, Error> {
    let current = ctx.current();
    state.pages.landing(current.identity(), state.config.auth.allow_registration)
}

/// The signed-in owner's files and the upload form
#[tracing::instrument(skip_all)]
pub async fn dashboard(State(state): State<AppState>, CurrentIdentity(identity): CurrentIdentity) -> Result<Html<String>, Error> {
    let registry = FileRegistry::open(state.backend.metadata.clone(), identity.id).await?;
    let files: Vec<FileResponse> = registry
        .records()
        .iter()
        .map(|record| FileResponse::from_record(record, &state.config))
        .collect();
    registry.close();

    state
        .pages
        .dashboard(&identity, &files, &format_file_size(state.config.limits.max_file_size))
}

/// Public page for a shared file. Each render counts as a view.
#[tracing::instrument(skip_all)]
pub async fn file_page(State(state): State<AppState>, Session(ctx): Session, Path(id): Path<String>) -> Result<Response, Error> {
    let viewer = PublicViewer::new(state.backend.metadata.clone());

    match viewer.view(&id).await? {
        ViewOutcome::Found(record) => {
            let file = FileResponse::from_record(&record, &state.config);
            Ok(state.pages.file(ctx.current().identity(), &file)?.into_response())
        }
        ViewOutcome::NotFound => not_found(&state),
    }
}

/// Send the browser to the file's public URL
#[tracing::instrument(skip_all)]
pub async fn download(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, Error> {
    let viewer = PublicViewer::new(state.backend.metadata.clone());

    match viewer.download_target(&id).await? {
        Some(url) => Ok(Redirect::to(&url).into_response()),
        None => not_found(&state),
    }
}

pub async fn healthz() -> &'static str {
    "OK"
}

fn not_found(state: &AppState) -> Result<Response, Error> {
    Ok((StatusCode::NOT_FOUND, state.pages.not_found()?).into_response())
}
