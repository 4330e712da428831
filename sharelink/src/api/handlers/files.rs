use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use bytes::BytesMut;
use futures::{Stream, StreamExt, stream};
use tracing::{debug, warn};

use crate::{
    AppState,
    api::models::files::{FileListResponse, FileResponse},
    auth::current_user::{CurrentIdentity, Session},
    errors::Error,
    files::{
        UploadError,
        progress::UploadProgress,
        registry::{FileRegistry, RegistryUpdate},
        uploader::{SelectedFile, Uploader},
    },
};

/// Read error on a multipart body. A body over the request limit becomes a size error.
fn multipart_error(e: MultipartError, received: u64, max: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return UploadError::TooLarge { size: received, max }.into();
    }
    Error::BadRequest {
        message: format!("Failed to parse multipart data: {}", e.body_text()),
    }
}

/// Upload a file and get its public link
#[utoipa::path(
    post,
    path = "/files",
    tag = "files",
    request_body(
        content_type = "multipart/form-data",
        description = "A single `file` field; its filename and content type are kept"
    ),
    responses(
        (status = 201, description = "File stored and recorded", body = FileResponse),
        (status = 400, description = "No file selected"),
        (status = 401, description = "Not signed in"),
        (status = 413, description = "File exceeds the configured maximum size"),
        (status = 500, description = "Upload failed on the backend"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn upload_file(
    State(state): State<AppState>,
    Session(ctx): Session,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>), Error> {
    let identity = ctx.current().identity().cloned().ok_or(UploadError::NotSignedIn)?;
    let uploader = Uploader::new(&state.backend, &state.config);
    let max_file_size = uploader.max_file_size();

    let mut selected: Option<SelectedFile> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, 0, max_file_size))?
    {
        if field.name() != Some("file") {
            debug!(field = ?field.name(), "Ignoring multipart field");
            continue;
        }

        let name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);

        // Fail as soon as the limit is crossed instead of buffering the rest
        let mut content = BytesMut::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| multipart_error(e, content.len() as u64, max_file_size))?
        {
            content.extend_from_slice(&chunk);
            let received = content.len() as u64;
            if received > max_file_size {
                warn!(received, max_file_size, "File size limit exceeded, aborting upload");
                return Err(UploadError::TooLarge {
                    size: received,
                    max: max_file_size,
                }
                .into());
            }
        }

        let file = SelectedFile::new(name, content.freeze());
        selected = Some(match mime_type {
            Some(mime_type) => file.with_mime_type(mime_type),
            None => file,
        });
        break;
    }

    let file = selected.ok_or(UploadError::NothingSelected)?;
    let record = uploader.upload(&identity, file, &UploadProgress::new()).await?;

    Ok((StatusCode::CREATED, Json(FileResponse::from_record(&record, &state.config))))
}

/// List the signed-in owner's files, newest first
#[utoipa::path(
    get,
    path = "/files",
    tag = "files",
    responses(
        (status = 200, description = "The owner's files", body = FileListResponse),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_files(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<FileListResponse>, Error> {
    let registry = FileRegistry::open(state.backend.metadata.clone(), identity.id).await?;
    let response = FileListResponse::from_records(registry.records(), &state.config);
    registry.close();

    Ok(Json(response))
}

/// Live feed of the signed-in owner's files.
///
/// Sends a `snapshot` event with the full list first, then one `file_inserted` event per new
/// file. A fresh `snapshot` follows whenever the feed had to resynchronize.
#[utoipa::path(
    get,
    path = "/files/events",
    tag = "files",
    responses(
        (status = 200, description = "Server-sent events stream", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Not signed in"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn file_events(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, Error> {
    let registry = FileRegistry::open(state.backend.metadata.clone(), identity.id).await?;
    let snapshot = snapshot_event(&registry, &state);

    let updates = stream::unfold(Some((registry, state)), |current| async move {
        let (mut registry, state) = current?;

        match registry.next_update().await {
            Ok(Some(RegistryUpdate::Inserted(record))) => {
                let event = Event::default()
                    .event("file_inserted")
                    .json_data(FileResponse::from_record(&record, &state.config));
                Some((event, Some((registry, state))))
            }
            Ok(Some(_)) => {
                let event = snapshot_event(&registry, &state);
                Some((event, Some((registry, state))))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("File feed failed: {}", e);
                registry.close();
                Some((Ok(Event::default().event("error").data("File feed interrupted")), None))
            }
        }
    });

    let events = stream::once(async move { snapshot }).chain(updates);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn snapshot_event(registry: &FileRegistry, state: &AppState) -> Result<Event, axum::Error> {
    Event::default()
        .event("snapshot")
        .json_data(FileListResponse::from_records(registry.records(), &state.config))
}
