//! The growing output raster of a collage.
use image::{imageops, RgbImage};

use super::{errors::CollageError, row::RowRender, BorderColor};

/// Fail unless a `width` x `height` raster stays within `limit` pixels.
pub fn ensure_fits(width: u32, height: u32, limit: u64) -> Result<(), CollageError> {
    if u64::from(width).saturating_mul(u64::from(height)) > limit {
        return Err(CollageError::CanvasTooLarge {
            width,
            height,
            limit,
        });
    }
    Ok(())
}

/// A fixed-width raster that grows downwards one row at a time.
///
/// Growing reallocates and copies the previous content, which is fine for
/// the handful of rows a banner has.
#[derive(Debug)]
pub struct Canvas {
    image: RgbImage,
    color: BorderColor,
    /// Pixel budget for the whole canvas.
    limit: u64,
    /// Whether the last row appended was content. Only a content row
    /// directly below another one is separated from it by a border, a
    /// spacer already is the separation.
    after_content: bool,
}

impl Canvas {
    /// An empty (zero height) canvas which may grow up to `limit` pixels.
    pub fn new(width: u32, color: BorderColor, limit: u64) -> Self {
        Self {
            image: RgbImage::from_pixel(width, 0, color.rgb()),
            color,
            limit,
            after_content: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Append a row below the current content.
    ///
    /// A spacer adds `border` rows of border colour. A content row adds its
    /// own height, plus `border` when it follows another content row.
    ///
    /// Fails without touching the canvas when the grown canvas would exceed
    /// its pixel budget.
    pub fn append(&mut self, row: &RowRender, border: u32) -> Result<(), CollageError> {
        match row {
            RowRender::Spacer => {
                self.grow(border)?;
                self.after_content = false;
            }
            RowRender::Content(pixels) => {
                let gap = if self.after_content { border } else { 0 };
                let top = self.grow(gap.saturating_add(pixels.height()))?.saturating_add(gap);
                imageops::replace(&mut self.image, pixels, 0, i64::from(top));
                self.after_content = true;
            }
        }
        Ok(())
    }

    /// Grow by `extra` rows of border colour, returning the previous height.
    fn grow(&mut self, extra: u32) -> Result<u32, CollageError> {
        let old_height = self.height();
        if extra == 0 {
            return Ok(old_height);
        }
        let new_height = old_height.checked_add(extra).ok_or(CollageError::CanvasTooLarge {
            width: self.width(),
            height: u32::MAX,
            limit: self.limit,
        })?;
        ensure_fits(self.width(), new_height, self.limit)?;
        let mut grown = RgbImage::from_pixel(self.width(), new_height, self.color.rgb());
        imageops::replace(&mut grown, &self.image, 0, 0);
        self.image = grown;
        Ok(old_height)
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}
