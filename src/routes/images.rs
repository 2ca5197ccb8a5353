//! Routes for staging source images and fetching published collages.
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    services::{media, storage, tinify::errors::TinifyError},
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/images/{prefix}",
            post(upload_images).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/tinify/{prefix}",
            post(tinify_images).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/results/{prefix}", get(retrieve_result))
}

#[derive(Serialize)]
struct UploadResponse {
    /// The blob keys the uploaded files were staged to.
    keys: Vec<String>,
}

/// Stage every file field of a multipart upload under `prefix`. Files are
/// staged as they arrive, so a rejected file leaves earlier ones in place.
async fn upload_images(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), HttpError> {
    if !media::is_valid_name(&prefix) {
        return Err(media::errors::StoreImageError::InvalidPrefix.into());
    }
    let mut keys = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        // Plain form fields carry no file name and are ignored.
        let Some(filename) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(bad_multipart)?;
        keys.push(media::stage_image(&state.store, &prefix, &filename, bytes.to_vec()).await?);
    }
    if keys.is_empty() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("Upload contained no files".to_owned()),
        ));
    }
    Ok((StatusCode::CREATED, Json(UploadResponse { keys })))
}

#[derive(Deserialize)]
struct TinifyQuery {
    /// Scale the compressed images to this width.
    width: Option<u32>,
}

/// Compress every file of a multipart upload through Tinify, then stage the
/// compressed images under `prefix`. Nothing is staged unless every file
/// was compressed.
async fn tinify_images(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Query(query): Query<TinifyQuery>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), HttpError> {
    if !media::is_valid_name(&prefix) {
        return Err(media::errors::StoreImageError::InvalidPrefix.into());
    }
    if query.width == Some(0) {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("width must be positive".to_owned()),
        ));
    }
    let tinify = state.tinify.as_ref().ok_or(TinifyError::NotConfigured)?;
    let files = read_files(multipart).await?;
    if let Some((name, _)) = files.iter().find(|(name, _)| !media::is_valid_name(name)) {
        warn!(%name, "Rejected tinify upload with an invalid filename");
        return Err(media::errors::StoreImageError::InvalidFileName.into());
    }

    let compressed = tinify.shrink_all(files, query.width).await?;
    let mut keys = Vec::with_capacity(compressed.len());
    for (filename, bytes) in compressed {
        keys.push(media::stage_image(&state.store, &prefix, &filename, bytes.to_vec()).await?);
    }
    Ok((StatusCode::CREATED, Json(UploadResponse { keys })))
}

/// Every named file field of a multipart body. At least one is required.
async fn read_files(mut multipart: Multipart) -> Result<Vec<(String, Bytes)>, HttpError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(filename) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        files.push((filename, field.bytes().await.map_err(bad_multipart)?));
    }
    if files.is_empty() {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            Some("Upload contained no files".to_owned()),
        ));
    }
    Ok(files)
}

fn bad_multipart(err: MultipartError) -> HttpError {
    HttpError::new(err.status(), Some(err.body_text()))
}

/// Fetch the published collage for `prefix`.
async fn retrieve_result(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    if !media::is_valid_name(&prefix) {
        return Err(media::errors::StoreImageError::InvalidPrefix.into());
    }
    let bytes: Bytes = state
        .store
        .fetch(&storage::result_key(&prefix))
        .await?
        .ok_or_else(|| {
            HttpError::new(
                StatusCode::NOT_FOUND,
                Some(format!("No collage has been published for {prefix:?}")),
            )
        })?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes))
}
