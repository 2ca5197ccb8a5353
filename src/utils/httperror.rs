//! HTTP error handling and automated response generation
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::services::{
    collage::errors::CollageError, errors::StorageError, jobs::errors::QueueError,
    media::errors::StoreImageError, tinify::errors::TinifyError,
};

/// Represents an HTTP status code, optionally with a custom message.
#[derive(Debug)]
pub struct HttpError {
    /// The numeric HTTP status code to respond with.
    status: StatusCode,
    /// The message to include in the response.
    message: Option<String>,
}

impl From<StatusCode> for HttpError {
    fn from(err: StatusCode) -> Self {
        Self {
            status: err,
            message: None,
        }
    }
}

impl HttpError {
    /// Construct a new HTTP error with a given status code and message.
    pub const fn new(status: StatusCode, message: Option<String>) -> Self {
        Self { status, message }
    }
}

#[cfg(test)]
impl HttpError {
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let message = self
            .message
            .unwrap_or_else(|| self.status.canonical_reason().unwrap_or("").to_owned());
        (self.status, Json(json!({"message": message}))).into_response()
    }
}

impl From<StorageError> for HttpError {
    fn from(err: StorageError) -> Self {
        error!("Error raised from blob store in handler: {err}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(err.to_string()))
    }
}

impl From<CollageError> for HttpError {
    fn from(err: CollageError) -> Self {
        let status = match err {
            CollageError::Storage(storage) => return storage.into(),
            CollageError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ if err.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
            _ => {
                error!("Collage error in handler: {err}");
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(err.to_string()));
            }
        };
        warn!("Rejected collage request: {err}");
        Self::new(status, Some(err.to_string()))
    }
}

impl From<StoreImageError> for HttpError {
    fn from(err: StoreImageError) -> Self {
        match err {
            StoreImageError::StorageError(storage) => storage.into(),
            StoreImageError::InvalidFileType
            | StoreImageError::InvalidFileName
            | StoreImageError::InvalidPrefix => {
                warn!("Rejected image upload: {err}");
                Self::new(StatusCode::BAD_REQUEST, Some(err.to_string()))
            }
        }
    }
}

impl From<QueueError> for HttpError {
    fn from(err: QueueError) -> Self {
        warn!("Collage job not queued: {err}");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, Some(err.to_string()))
    }
}

impl From<TinifyError> for HttpError {
    fn from(err: TinifyError) -> Self {
        let status = match err {
            TinifyError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            _ if err.is_bad_image() => StatusCode::BAD_REQUEST,
            _ => {
                error!("Tinify request failed: {err}");
                return Self::new(StatusCode::BAD_GATEWAY, Some(err.to_string()));
            }
        };
        warn!("Image not compressed: {err}");
        Self::new(status, Some(err.to_string()))
    }
}
