//! Rendering of a single collage row.
//!
//! Every image in a row is forced to the same tile size. The tile width is
//! the row width shared out between the images (floor division, so a few
//! columns on the right may be left as background) and the tile height is
//! taken from the first image's aspect ratio alone.
use std::path::{Path, PathBuf};

use image::{
    imageops::{self, FilterType},
    ImageReader, Limits, RgbImage,
};

use super::{canvas, errors::CollageError, Geometry};

/// A rendered row, ready to be appended to the canvas.
#[derive(Debug)]
pub enum RowRender {
    /// A schema entry of zero: the canvas only grows by one border.
    Spacer,
    /// Row pixels, exactly as wide as the canvas.
    Content(RgbImage),
}

/// Decode each image of `group` and lay them out as one row.
pub fn render_row(
    group: &[PathBuf],
    geometry: &Geometry,
    max_pixels: u64,
) -> Result<RowRender, CollageError> {
    let images = group
        .iter()
        .map(|path| decode(path, max_pixels))
        .collect::<Result<Vec<_>, _>>()?;
    compose_row(&images, geometry)
}

/// Lay out already decoded images as one row.
pub fn compose_row(images: &[RgbImage], geometry: &Geometry) -> Result<RowRender, CollageError> {
    let Some(first) = images.first() else {
        return Ok(RowRender::Spacer);
    };
    let tile_width = tile_width(geometry.width, geometry.border, images.len())?;
    let tile_height = scaled_height(first.width(), first.height(), tile_width);
    let stride = i64::from(tile_width) + i64::from(geometry.border);
    canvas::ensure_fits(geometry.width, tile_height, geometry.max_canvas_pixels)?;

    let mut row = RgbImage::from_pixel(geometry.width, tile_height, geometry.color.rgb());
    let mut x = 0_i64;
    for image in images {
        if image.dimensions() == (tile_width, tile_height) {
            imageops::replace(&mut row, image, x, 0);
        } else {
            let tile = imageops::resize(image, tile_width, tile_height, FilterType::Lanczos3);
            imageops::replace(&mut row, &tile, x, 0);
        }
        x += stride;
    }
    Ok(RowRender::Content(row))
}

/// Width of each tile in a row of `count` images separated by `border`.
pub fn tile_width(row_width: u32, border: u32, count: usize) -> Result<u32, CollageError> {
    let too_narrow = || CollageError::RowTooNarrow {
        count,
        border,
        width: row_width,
    };
    let count_u32 = u32::try_from(count).map_err(|_err| too_narrow())?;
    let gaps = border
        .checked_mul(count_u32.saturating_sub(1))
        .ok_or_else(too_narrow)?;
    let available = row_width.checked_sub(gaps).ok_or_else(too_narrow)?;
    match available.checked_div(count_u32) {
        Some(width) if width > 0 => Ok(width),
        _ => Err(too_narrow()),
    }
}

/// Height of an image of `native_width` x `native_height` scaled to
/// `target_width`, never less than one pixel.
#[expect(
    clippy::as_conversions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "The value is rounded and non-negative, and bounded by the decoder pixel limit"
)]
pub fn scaled_height(native_width: u32, native_height: u32, target_width: u32) -> u32 {
    if native_width == 0 {
        return native_height.max(1);
    }
    let scale = f64::from(target_width) / f64::from(native_width);
    ((f64::from(native_height) * scale).round() as u32).max(1)
}

/// Read only the header of an image to get its dimensions.
pub fn dimensions(path: &Path) -> Result<(u32, u32), CollageError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|source| CollageError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Decode an image, refusing anything larger than `max_pixels`.
pub fn decode(path: &Path, max_pixels: u64) -> Result<RgbImage, CollageError> {
    let mut reader = ImageReader::open(path)?.with_guessed_format()?;
    reader.limits(decode_limits(max_pixels));
    let image = reader.decode().map_err(|source| CollageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

fn decode_limits(max_pixels: u64) -> Limits {
    let max_dim = u32::try_from(max_pixels).unwrap_or(u32::MAX);
    let mut limits = Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_pixels.saturating_mul(4));
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::collage::BorderColor;
    use image::Rgb;

    const RED: Rgb<u8> = Rgb([255, 0, 0]);
    const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
    const GREY: BorderColor = BorderColor([128, 128, 128]);

    fn geometry(width: u32, border: u32) -> Geometry {
        Geometry {
            width,
            border,
            color: GREY,
            max_canvas_pixels: u64::MAX,
        }
    }

    fn content(row: RowRender) -> RgbImage {
        match row {
            RowRender::Content(image) => image,
            RowRender::Spacer => panic!("expected a content row"),
        }
    }

    #[test]
    fn empty_group_is_a_spacer() {
        let row = compose_row(&[], &geometry(200, 10)).unwrap();
        assert!(matches!(row, RowRender::Spacer));
    }

    #[test]
    fn tile_width_uses_floor_division() {
        assert_eq!(tile_width(200, 0, 2).unwrap(), 100);
        assert_eq!(tile_width(100, 0, 3).unwrap(), 33);
        assert_eq!(tile_width(210, 10, 3).unwrap(), 63);
        assert_eq!(tile_width(200, 50, 1).unwrap(), 200);
    }

    #[test]
    fn rows_without_room_for_tiles_are_rejected() {
        assert!(matches!(
            tile_width(20, 10, 3),
            Err(CollageError::RowTooNarrow { count: 3, .. })
        ));
        assert!(tile_width(2, 0, 3).is_err());
        assert!(tile_width(100, u32::MAX, 3).is_err());
    }

    #[test]
    fn row_height_comes_from_the_first_image() {
        let images = [
            RgbImage::from_pixel(100, 50, RED),
            RgbImage::from_pixel(40, 90, BLUE),
        ];
        let row = content(compose_row(&images, &geometry(400, 0)).unwrap());
        // 200 wide tiles, first image scaled by 2.
        assert_eq!(row.dimensions(), (400, 100));
        assert_eq!(*row.get_pixel(100, 50), RED);
        // the second image is stretched to the same tile size
        assert_eq!(*row.get_pixel(300, 50), BLUE);
        assert_eq!(*row.get_pixel(399, 99), BLUE);
    }

    #[test]
    fn tiles_are_separated_by_border_colour() {
        let images = [
            RgbImage::from_pixel(50, 50, RED),
            RgbImage::from_pixel(50, 50, BLUE),
        ];
        let row = content(compose_row(&images, &geometry(110, 10)).unwrap());
        assert_eq!(row.dimensions(), (110, 50));
        assert_eq!(*row.get_pixel(49, 0), RED);
        for x in 50..60 {
            assert_eq!(*row.get_pixel(x, 25), GREY.rgb());
        }
        assert_eq!(*row.get_pixel(60, 0), BLUE);
        assert_eq!(*row.get_pixel(109, 49), BLUE);
    }

    #[test]
    fn floor_division_shortfall_is_background() {
        let images = [
            RgbImage::from_pixel(33, 33, RED),
            RgbImage::from_pixel(33, 33, RED),
            RgbImage::from_pixel(33, 33, RED),
        ];
        let row = content(compose_row(&images, &geometry(100, 0)).unwrap());
        assert_eq!(row.dimensions(), (100, 33));
        assert_eq!(*row.get_pixel(98, 10), RED);
        assert_eq!(*row.get_pixel(99, 10), GREY.rgb());
    }

    #[test]
    fn exact_division_fills_the_row() {
        let images = [
            RgbImage::from_pixel(25, 10, BLUE),
            RgbImage::from_pixel(25, 10, BLUE),
            RgbImage::from_pixel(25, 10, BLUE),
            RgbImage::from_pixel(25, 10, BLUE),
        ];
        let row = content(compose_row(&images, &geometry(100, 0)).unwrap());
        assert!(row.pixels().all(|pixel| *pixel == BLUE));
    }

    #[test]
    fn scaled_height_rounds_and_never_collapses() {
        assert_eq!(scaled_height(100, 50, 200), 100);
        assert_eq!(scaled_height(3, 1, 5), 2);
        assert_eq!(scaled_height(1000, 1, 10), 1);
        assert_eq!(scaled_height(0, 7, 10), 7);
    }

    #[test]
    fn render_row_decodes_files_and_reports_bad_ones() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.png");
        RgbImage::from_pixel(100, 50, RED).save(&good).unwrap();
        let bad = dir.path().join("b.png");
        std::fs::write(&bad, b"not an image").unwrap();

        let row = content(render_row(&[good.clone()], &geometry(50, 0), 1_000_000).unwrap());
        assert_eq!(row.dimensions(), (50, 25));
        assert_eq!(dimensions(&good).unwrap(), (100, 50));

        let err = render_row(&[good, bad.clone()], &geometry(50, 0), 1_000_000).unwrap_err();
        assert!(matches!(err, CollageError::Decode { path, .. } if path == bad));
    }

    #[test]
    fn oversized_images_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbImage::from_pixel(200, 10, RED).save(&path).unwrap();
        assert!(matches!(
            decode(&path, 100),
            Err(CollageError::Decode { .. })
        ));
    }

    #[test]
    fn rows_larger_than_the_canvas_budget_are_refused() {
        let images = [RgbImage::from_pixel(1, 1, RED)];
        let huge = Geometry {
            max_canvas_pixels: 16_000_000,
            ..geometry(u32::MAX, 0)
        };
        // a 1x1 tile scaled to u32::MAX wide would be u32::MAX tall
        assert!(matches!(
            compose_row(&images, &huge),
            Err(CollageError::CanvasTooLarge {
                width: u32::MAX,
                limit: 16_000_000,
                ..
            })
        ));
        let fits = Geometry {
            max_canvas_pixels: 100,
            ..geometry(10, 0)
        };
        assert!(compose_row(&images, &fits).is_ok());
    }
}
