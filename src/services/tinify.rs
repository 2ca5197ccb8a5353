//! Client for the Tinify compression API.
//!
//! Each image is posted to `/shrink`. Tinify answers with the location of
//! the compressed image, which is then fetched with a `scale` resize to the
//! requested width (or the compressed image's own width).
use core::time::Duration;

use axum::body::Bytes;
use futures::{StreamExt as _, TryStreamExt as _};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{Secret, TinifyConfig};

/// Tinify always authenticates as the user `api` with the key as password.
const AUTH_USER: &str = "api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// The body Tinify returns from `/shrink`, whether it succeeded or not.
#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: Option<ShrinkOutput>,
    error: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    width: u32,
    url: String,
}

#[derive(Clone)]
pub struct TinifyClient {
    client: reqwest::Client,
    endpoint: String,
    token: Secret,
    concurrency: usize,
}

impl TinifyClient {
    pub fn new(config: &TinifyConfig) -> Result<Self, errors::TinifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("graphic-tools-api")
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            concurrency: config.concurrency.max(1),
        })
    }

    /// Compress one image and scale it to `width`, keeping its width when
    /// none is given.
    pub async fn shrink(&self, image: Bytes, width: Option<u32>) -> Result<Bytes, errors::TinifyError> {
        let response = self
            .client
            .post(format!("{}/shrink", self.endpoint))
            .basic_auth(AUTH_USER, Some(self.token.expose()))
            .body(image)
            .send()
            .await?;
        let status = response.status();
        let body: ShrinkResponse = response.json().await?;
        if let Some(error) = body.error {
            warn!(%status, %error, "Tinify rejected an image");
            return Err(errors::TinifyError::Rejected {
                status: status.as_u16(),
                error,
                message: body.message.unwrap_or_default(),
            });
        }
        let output = body.output.ok_or(errors::TinifyError::MissingOutput)?;
        let width = width.unwrap_or(output.width);
        debug!(url = %output.url, width, "fetching compressed image");

        let resized = self
            .client
            .post(&output.url)
            .basic_auth(AUTH_USER, Some(self.token.expose()))
            .json(&json!({"resize": {"method": "scale", "width": width}}))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(resized)
    }

    /// Compress every named image, at most `concurrency` at a time. The
    /// results keep the order of `images`, and the first failure fails them
    /// all.
    pub async fn shrink_all(
        &self,
        images: Vec<(String, Bytes)>,
        width: Option<u32>,
    ) -> Result<Vec<(String, Bytes)>, errors::TinifyError> {
        futures::stream::iter(images)
            .map(|(name, image)| async move {
                let shrunk = self.shrink(image, width).await?;
                Ok::<_, errors::TinifyError>((name, shrunk))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

pub mod errors {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum TinifyError {
        #[error("Image compression is not configured")]
        NotConfigured,
        #[error("Tinify rejected the image ({status} {error}): {message}")]
        Rejected {
            status: u16,
            error: String,
            message: String,
        },
        #[error("Tinify did not say where the compressed image is")]
        MissingOutput,
        #[error("Failed to reach Tinify: {0}")]
        Transport(#[from] reqwest::Error),
    }

    impl TinifyError {
        /// Whether Tinify refused the image itself, rather than the request
        /// failing on our side or theirs.
        pub const fn is_bad_image(&self) -> bool {
            matches!(self, Self::Rejected { status: 400 | 415, .. })
        }
    }
}
