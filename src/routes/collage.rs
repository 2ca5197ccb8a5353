//! Routes which start collage jobs and report on them.
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    services::{
        collage::{BorderColor, CollageRequest, Layout},
        jobs::JobStatus,
        storage,
    },
    state::AppState,
    utils::httperror::HttpError,
};

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/tile", post(start_tile))
        .route("/stitch", post(start_stitch))
        .route("/jobs/{prefix}", get(job_status))
}

/// Request body for a tiled collage.
#[derive(Deserialize)]
struct TileRequest {
    prefix: String,
    /// Image count per row, zero for a spacer row.
    schema: Vec<usize>,
    width: Option<u32>,
    #[serde(default)]
    border: u32,
    #[serde(default)]
    border_color: BorderColor,
}

/// Request body for a vertical stitch, one image per row.
#[derive(Deserialize)]
struct StitchRequest {
    prefix: String,
    width: Option<u32>,
    #[serde(default)]
    border: u32,
    #[serde(default)]
    border_color: BorderColor,
}

/// Returned once a job has been queued.
#[derive(Serialize)]
struct AcceptedResponse {
    prefix: String,
    /// Where to poll for the job's progress.
    status_url: String,
    /// Where the collage will be published.
    result_key: String,
}

async fn start_tile(
    State(state): State<AppState>,
    Json(body): Json<TileRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), HttpError> {
    let request = CollageRequest {
        prefix: body.prefix,
        layout: Layout::Rows(body.schema),
        width: body.width,
        border: body.border,
        border_color: body.border_color,
    };
    enqueue(&state, request).await
}

async fn start_stitch(
    State(state): State<AppState>,
    Json(body): Json<StitchRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), HttpError> {
    let request = CollageRequest {
        prefix: body.prefix,
        layout: Layout::Stack,
        width: body.width,
        border: body.border,
        border_color: body.border_color,
    };
    enqueue(&state, request).await
}

/// Check the request against the staged images, then hand it to the
/// workers. The response does not wait for the job.
async fn enqueue(
    state: &AppState,
    request: CollageRequest,
) -> Result<(StatusCode, Json<AcceptedResponse>), HttpError> {
    let staged = state.collager.precheck(&request).await?;
    let response = AcceptedResponse {
        status_url: format!(
            "{}/api/jobs/{}",
            state.config.api_uri_prefix.trim_end_matches('/'),
            request.prefix
        ),
        result_key: storage::result_key(&request.prefix).to_string(),
        prefix: request.prefix.clone(),
    };
    info!(prefix = %request.prefix, staged, "accepted collage request");
    state.jobs.try_enqueue(request)?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// The latest status of the job for a prefix.
async fn job_status(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<JobStatus>, HttpError> {
    let status = state.registry().get(&prefix).ok_or_else(|| {
        HttpError::new(
            StatusCode::NOT_FOUND,
            Some(format!("No job has run for prefix {prefix:?}")),
        )
    })?;
    Ok(Json(status))
}
