//! Unauthenticated access to shared files: anyone holding the link may view and download.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::{
    AppState,
    api::models::files::FileResponse,
    backend::{errors::BackendError, objects::StorageKey},
    errors::Error,
    files::viewer::{PublicViewer, ViewOutcome},
};

/// Shown when a shared link does not resolve
pub const FILE_NOT_FOUND_MESSAGE: &str = "File Not Found";

/// Resolve a shared file and count the view
#[utoipa::path(
    get,
    path = "/public/files/{id}",
    tag = "public",
    params(("id" = String, Path, description = "File identifier from the share link")),
    responses(
        (status = 200, description = "The shared file", body = FileResponse),
        (status = 404, description = "No file with this identifier"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_public_file(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, Error> {
    let viewer = PublicViewer::new(state.backend.metadata.clone());

    Ok(match viewer.view(&id).await? {
        ViewOutcome::Found(record) => Json(FileResponse::from_record(&record, &state.config)).into_response(),
        ViewOutcome::NotFound => (StatusCode::NOT_FOUND, Json(json!({ "message": FILE_NOT_FOUND_MESSAGE }))).into_response(),
    })
}

/// Serve stored object bytes under their public URL
#[tracing::instrument(skip_all)]
pub async fn serve_object(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, Error> {
    // A malformed key cannot name an object, so it is reported the same as a missing one
    let key = match StorageKey::parse(&key) {
        Ok(key) => key,
        Err(_) => return Ok(object_not_found()),
    };

    let content = match state.backend.objects.get(&key).await {
        Ok(content) => content,
        Err(BackendError::NotFound) => return Ok(object_not_found()),
        Err(e) => return Err(e.into()),
    };

    let mime_type = mime_guess::from_ext(key.extension()).first_or_octet_stream();
    let content_type = HeaderValue::from_str(mime_type.essence_str()).unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            // Keys are never reused, so the bytes behind one never change
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=31536000, immutable")),
        ],
        content,
    )
        .into_response())
}

fn object_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": FILE_NOT_FOUND_MESSAGE }))).into_response()
}
