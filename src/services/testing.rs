//! Test doubles: an object store which fails chosen operations on chosen
//! keys, and a stand-in for the Tinify API.
use std::{
    collections::HashSet,
    fmt,
    io::Cursor,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path as UrlPath, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use futures::stream::BoxStream;
use image::{ImageFormat, Rgb, RgbImage};
use object_store::{
    memory::InMemory, path::Path, Error, GetOptions, GetResult, ListResult, MultipartUpload,
    ObjectMeta, ObjectStore, PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Put,
    Delete,
}

/// [`InMemory`] with injectable faults.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: InMemory,
    faults: Mutex<HashSet<(Operation, String)>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `operation` on `key` fail from now on.
    pub fn fail(&self, operation: Operation, key: &str) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((operation, key.to_owned()));
    }

    fn check(&self, operation: Operation, location: &Path) -> Result<()> {
        let faulted = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(operation, location.to_string()));
        if faulted {
            return Err(Error::Generic {
                store: "faulty",
                source: format!("injected {operation:?} failure for {location}").into(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        self.check(Operation::Put, location)?;
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        self.check(Operation::Put, location)?;
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        self.check(Operation::Get, location)?;
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.check(Operation::Delete, location)?;
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

const PNG_MAGIC: &[u8] = b"\x89PNG";
/// Basic auth for the token `secret`.
const EXPECTED_AUTH: &str = "Basic YXBpOnNlY3JldA==";

/// A solid PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(width, height, Rgb([200, 10, 10]))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

fn authorised(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value == EXPECTED_AUTH)
}

async fn mock_shrink(
    State(base): State<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !authorised(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized", "message": "Credentials are invalid"})),
        );
    }
    if !body.starts_with(PNG_MAGIC) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({"error": "Unsupported media type", "message": "File type is not supported"})),
        );
    }
    let width = image::load_from_memory(&body).unwrap().width();
    (
        StatusCode::CREATED,
        Json(json!({
            "input": {"size": body.len(), "type": "image/png"},
            "output": {"size": body.len(), "type": "image/png", "width": width, "height": 1, "ratio": 1.0, "url": format!("{base}/output/1")},
        })),
    )
}

async fn mock_output(
    UrlPath(_id): UrlPath<String>,
    headers: HeaderMap,
    Json(options): Json<Value>,
) -> impl IntoResponse {
    if !authorised(&headers) || options["resize"]["method"] != "scale" {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let width = u32::try_from(options["resize"]["width"].as_u64().unwrap()).unwrap();
    png(width, 3).into_response()
}

/// Serve a stand-in for the Tinify API on an ephemeral port.
pub async fn mock_tinify() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/shrink", post(mock_shrink))
        .route("/output/{id}", post(mock_output))
        .with_state(base.clone());
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    base
}
