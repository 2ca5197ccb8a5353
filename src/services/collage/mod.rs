//! Tiled collage composition: staged images are downloaded, sorted by
//! filename, laid out in rows according to a schema, stacked onto a single
//! canvas and published as one JPEG.
pub mod canvas;
pub mod row;
pub mod sequencer;

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use image::{codecs::jpeg::JpegEncoder, ImageEncoder as _, Rgb, RgbImage};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::CollageConfig,
    services::{
        jobs::{JobHandle, JobState},
        media,
        storage::{self, BlobStore},
        workspace::{ScratchDir, StagedWorkspace, Workspace},
    },
};
use canvas::Canvas;

/// The single fill colour of a collage, used for borders, spacers and any
/// unfilled background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ColorInput")]
pub struct BorderColor(pub [u8; 3]);

impl BorderColor {
    pub const fn rgb(self) -> Rgb<u8> {
        Rgb(self.0)
    }
}

impl Default for BorderColor {
    fn default() -> Self {
        Self([255, 255, 255])
    }
}

/// Colours are accepted either as `[r, g, b]` or as `"#rrggbb"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ColorInput {
    Triple([u8; 3]),
    Hex(String),
}

impl TryFrom<ColorInput> for BorderColor {
    type Error = String;

    fn try_from(input: ColorInput) -> Result<Self, Self::Error> {
        match input {
            ColorInput::Triple(rgb) => Ok(Self(rgb)),
            ColorInput::Hex(value) => {
                parse_hex(&value).ok_or_else(|| format!("invalid colour {value:?}"))
            }
        }
    }
}

fn parse_hex(value: &str) -> Option<BorderColor> {
    let digits = value.strip_prefix('#').unwrap_or(value);
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: core::ops::Range<usize>| u8::from_str_radix(digits.get(range)?, 16).ok();
    Some(BorderColor([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
}

/// How staged images are arranged into rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// An explicit row schema: image count per row, zero for a spacer.
    Rows(Vec<usize>),
    /// One image per row, i.e. vertical stitching.
    Stack,
}

impl Layout {
    /// The schema to use when `available` images are staged.
    pub fn schema(&self, available: usize) -> Vec<usize> {
        match self {
            Self::Rows(schema) => schema.clone(),
            Self::Stack => vec![1; available],
        }
    }

    /// How many images the layout needs, or `None` when it uses them all.
    fn required(&self) -> Option<usize> {
        match self {
            Self::Rows(schema) => Some(
                schema
                    .iter()
                    .try_fold(0_usize, |total, &count| total.checked_add(count))
                    .unwrap_or(usize::MAX),
            ),
            Self::Stack => None,
        }
    }
}

/// Canvas width, border size and fill colour shared by every row.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub width: u32,
    pub border: u32,
    pub color: BorderColor,
    /// No row or canvas may hold more pixels than this.
    pub max_canvas_pixels: u64,
}

/// Everything needed to build one collage.
#[derive(Debug, Clone)]
pub struct CollageRequest {
    pub prefix: String,
    pub layout: Layout,
    /// Banner width. Taken from the first image when not given.
    pub width: Option<u32>,
    pub border: u32,
    pub border_color: BorderColor,
}

impl CollageRequest {
    /// Checks that need nothing but the request itself. A width that could
    /// not fit a single row of pixels within `max_canvas_pixels` is refused.
    pub fn validate(&self, max_canvas_pixels: u64) -> Result<(), errors::CollageError> {
        if !media::is_valid_name(&self.prefix) {
            return Err(errors::CollageError::InvalidRequest("prefix is not a valid name"));
        }
        if self.width == Some(0) {
            return Err(errors::CollageError::InvalidRequest("width must be positive"));
        }
        if let Some(width) = self.width {
            canvas::ensure_fits(width, 1, max_canvas_pixels)?;
        }
        if matches!(&self.layout, Layout::Rows(schema) if schema.is_empty()) {
            return Err(errors::CollageError::InvalidRequest("schema must not be empty"));
        }
        Ok(())
    }
}

/// Where and how big the published collage is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub result_key: String,
    pub width: u32,
    pub height: u32,
    /// Staged objects which could not be deleted after publishing.
    pub orphaned: Vec<String>,
}

/// Options the compositing thread needs besides the request.
#[derive(Debug, Clone, Copy)]
struct RenderOptions {
    jpeg_quality: u8,
    max_image_pixels: u64,
    max_canvas_pixels: u64,
}

/// Runs collage jobs against a blob store and a scratch workspace.
pub struct Collager {
    store: BlobStore,
    workspace: Workspace,
    options: RenderOptions,
}

impl Collager {
    pub fn new(store: BlobStore, config: &CollageConfig) -> Self {
        Self {
            store,
            workspace: Workspace::new(config.scratch_root.clone(), config.download_concurrency),
            options: RenderOptions {
                jpeg_quality: config.jpeg_quality,
                max_image_pixels: config.max_image_pixels,
                max_canvas_pixels: config.max_canvas_pixels,
            },
        }
    }

    /// Cheap validation against the blob store before a job is queued: the
    /// prefix must have staged images and the schema must not need more
    /// than there are. Returns the number of staged images.
    pub async fn precheck(&self, request: &CollageRequest) -> Result<usize, errors::CollageError> {
        request.validate(self.options.max_canvas_pixels)?;
        let available = self
            .store
            .list(&storage::staging_prefix(&request.prefix))
            .await?
            .len();
        if available == 0 {
            return Err(errors::WorkspaceError::EmptyPrefix(request.prefix.clone()).into());
        }
        if let Some(requested) = request.layout.required() {
            if requested > available {
                return Err(errors::SequenceError::SchemaOverrun {
                    requested,
                    available,
                }
                .into());
            }
        }
        Ok(available)
    }

    /// Build and publish a collage.
    ///
    /// Once staging has succeeded the scratch directory is removed on every
    /// path out of this function. Staged blobs are only deleted after the
    /// result has been uploaded.
    pub fn run<'a>(
        &'a self,
        request: &'a CollageRequest,
        progress: &'a JobHandle,
    ) -> BoxFuture<'a, Result<Published, errors::CollageError>> {
        Box::pin(self.execute(request, progress))
    }

    #[instrument(skip_all, fields(prefix = %request.prefix))]
    async fn execute(
        &self,
        request: &CollageRequest,
        progress: &JobHandle,
    ) -> Result<Published, errors::CollageError> {
        request.validate(self.options.max_canvas_pixels)?;
        progress.set(JobState::Staging);
        let StagedWorkspace {
            scratch,
            keys,
            files,
        } = self.workspace.stage(&self.store, &request.prefix).await?;

        let outcome = match self.render(request, &scratch, files, progress).await {
            Ok((width, height)) => {
                self.publish(&request.prefix, &scratch, &keys, progress)
                    .await
                    .map(|(result_key, orphaned)| Published {
                        result_key,
                        width,
                        height,
                        orphaned,
                    })
            }
            Err(err) => Err(err),
        };

        progress.set(JobState::CleaningUp);
        scratch.teardown().await;
        outcome
    }

    /// Compose and encode on a blocking thread, returning the canvas size.
    async fn render(
        &self,
        request: &CollageRequest,
        scratch: &ScratchDir,
        files: Vec<PathBuf>,
        progress: &JobHandle,
    ) -> Result<(u32, u32), errors::CollageError> {
        let request = request.clone();
        let result_path = scratch.result_path();
        let options = self.options;
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || {
            render_to_file(&request, files, &result_path, options, &progress)
        })
        .await
        .map_err(|_err| errors::CollageError::Interrupted)?
    }

    /// Upload the result, then delete the staged originals one by one. A
    /// failed delete is logged and reported, it never stops the others.
    async fn publish(
        &self,
        prefix: &str,
        scratch: &ScratchDir,
        keys: &[object_store::path::Path],
        progress: &JobHandle,
    ) -> Result<(String, Vec<String>), errors::CollageError> {
        progress.set(JobState::Publishing);
        let result_key = storage::result_key(prefix);
        self.store.upload(&scratch.result_path(), &result_key).await?;
        info!(%result_key, "published collage");

        let mut orphaned = Vec::new();
        for key in keys {
            if let Err(err) = self.store.delete(key).await {
                warn!(%key, "Failed to delete staged object: {err}");
                orphaned.push(key.to_string());
            }
        }
        Ok((result_key.to_string(), orphaned))
    }
}

/// Sequence, compose and encode `files`, writing the JPEG to `result_path`.
fn render_to_file(
    request: &CollageRequest,
    files: Vec<PathBuf>,
    result_path: &Path,
    options: RenderOptions,
    progress: &JobHandle,
) -> Result<(u32, u32), errors::CollageError> {
    progress.set(JobState::Sequencing);
    let ordered = sequencer::order(files);
    let schema = request.layout.schema(ordered.len());
    let width = match request.width {
        Some(width) => width,
        None => {
            let first = ordered.first().ok_or(errors::CollageError::MissingWidth)?;
            row::dimensions(first)?.0
        }
    };
    let geometry = Geometry {
        width,
        border: request.border,
        color: request.border_color,
        max_canvas_pixels: options.max_canvas_pixels,
    };
    let canvas = compose(&ordered, &schema, &geometry, options.max_image_pixels, |row, rows| {
        progress.set(JobState::Compositing { row, rows });
    })?;

    progress.set(JobState::Encoding);
    let dimensions = canvas.dimensions();
    let bytes = encode_jpeg(&canvas, options.jpeg_quality)?;
    std::fs::write(result_path, bytes)?;
    debug!(width = dimensions.0, height = dimensions.1, "encoded collage");
    Ok(dimensions)
}

/// Lay `ordered` out according to `schema` on a canvas `geometry.width`
/// wide. The schema is checked against the images before any row is
/// rendered. `on_row` is called with the 1-based row number before each row.
pub fn compose<F>(
    ordered: &[PathBuf],
    schema: &[usize],
    geometry: &Geometry,
    max_pixels: u64,
    mut on_row: F,
) -> Result<RgbImage, errors::CollageError>
where
    F: FnMut(usize, usize),
{
    let groups = sequencer::partition(ordered, schema)?;
    let rows = groups.len();
    let mut canvas = Canvas::new(geometry.width, geometry.color, geometry.max_canvas_pixels);
    for (index, group) in groups.into_iter().enumerate() {
        on_row(index + 1, rows);
        let rendered = row::render_row(group, geometry, max_pixels)?;
        canvas.append(&rendered, geometry.border)?;
        debug!(row = index + 1, rows, height = canvas.height(), "appended row");
    }
    Ok(canvas.into_image())
}

/// Encode the canvas as a baseline JPEG.
pub fn encode_jpeg(canvas: &RgbImage, quality: u8) -> Result<Vec<u8>, errors::CollageError> {
    if canvas.width() == 0 || canvas.height() == 0 {
        return Err(errors::CollageError::EmptyCanvas);
    }
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .write_image(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(errors::CollageError::Encode)?;
    Ok(bytes)
}

pub mod errors {
    use std::path::PathBuf;

    use thiserror::Error;

    pub use super::sequencer::errors::SequenceError;
    pub use crate::services::{errors::StorageError, workspace::errors::WorkspaceError};

    #[derive(Debug, Error)]
    pub enum CollageError {
        #[error("Invalid collage request: {0}")]
        InvalidRequest(&'static str),
        #[error(transparent)]
        Workspace(#[from] WorkspaceError),
        #[error(transparent)]
        Sequence(#[from] SequenceError),
        #[error("No width was given and there is no image to take it from")]
        MissingWidth,
        #[error("A row of {count} images with {border}px borders does not fit in {width}px")]
        RowTooNarrow { count: usize, border: u32, width: u32 },
        #[error("A {width}x{height} canvas exceeds the limit of {limit} pixels")]
        CanvasTooLarge { width: u32, height: u32, limit: u64 },
        #[error("Failed to decode {}: {source}", path.display())]
        Decode {
            path: PathBuf,
            source: image::ImageError,
        },
        #[error("The collage has no height to encode")]
        EmptyCanvas,
        #[error("Failed to encode the collage: {0}")]
        Encode(#[source] image::ImageError),
        #[error(transparent)]
        Storage(#[from] StorageError),
        #[error("Scratch file error: {0}")]
        Io(#[from] std::io::Error),
        #[error("Compositing was interrupted")]
        Interrupted,
    }

    impl CollageError {
        /// Whether the error is the caller's fault rather than a processing
        /// failure.
        pub const fn is_validation(&self) -> bool {
            matches!(
                self,
                Self::InvalidRequest(_)
                    | Self::Workspace(WorkspaceError::EmptyPrefix(_))
                    | Self::Sequence(_)
                    | Self::MissingWidth
                    | Self::RowTooNarrow { .. }
                    | Self::CanvasTooLarge { .. }
            )
        }
    }
}
