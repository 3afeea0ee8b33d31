//! Thumbnail decoding and fit-scaling
//!
//! Opens a source image with the `image` crate, applies the orientation the
//! decoder reports, scales it down to fit a target box and flattens it to
//! opaque RGB so it can be stored as JPEG.

use crate::error::DecodeError;
use crate::key::ThumbnailSize;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, RgbImage, Rgba};
use std::path::Path;

/// Decode `source_path` and scale it to fit inside `target`.
///
/// Images whose header reports more than `max_pixels` pixels are rejected
/// before any pixel data is decoded. Never upscales.
pub fn decode_and_fit(
    source_path: &Path,
    target: ThumbnailSize,
    max_pixels: u64,
) -> Result<RgbImage, DecodeError> {
    let reader = ImageReader::open(source_path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| DecodeError::Io {
            path: source_path.to_path_buf(),
            source,
        })?;

    let mut decoder = reader.into_decoder().map_err(|source| DecodeError::Image {
        path: source_path.to_path_buf(),
        source,
    })?;

    let (width, height) = decoder.dimensions();
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(DecodeError::TooLarge {
            path: source_path.to_path_buf(),
            width,
            height,
            limit: max_pixels,
        });
    }

    // A broken EXIF block should not cost us the whole image
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder).map_err(|source| DecodeError::Image {
        path: source_path.to_path_buf(),
        source,
    })?;
    img.apply_orientation(orientation);

    Ok(flatten_to_rgb(fit_image(img, target)))
}

/// Dimensions of `source` scaled to fit inside `target`, preserving aspect
/// ratio. Sources already inside the box are returned unchanged.
pub fn fit_dimensions(source: (u32, u32), target: ThumbnailSize) -> (u32, u32) {
    let (width, height) = source;
    if width == 0 || height == 0 || (width <= target.width && height <= target.height) {
        return source;
    }

    let ratio = (target.width as f64 / width as f64).min(target.height as f64 / height as f64);
    let new_width = ((width as f64 * ratio).round() as u32).clamp(1, target.width.max(1));
    let new_height = ((height as f64 * ratio).round() as u32).clamp(1, target.height.max(1));
    (new_width, new_height)
}

fn fit_image(img: DynamicImage, target: ThumbnailSize) -> DynamicImage {
    let current = (img.width(), img.height());
    let (width, height) = fit_dimensions(current, target);
    if (width, height) == current {
        return img;
    }
    img.resize_exact(width, height, FilterType::Lanczos3)
}

/// Convert to RGB8, compositing any alpha channel over white.
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
        let alpha = a as u16;
        let blend = |c: u8| ((c as u16 * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::fs;
    use tempfile::tempdir;

    const NO_CEILING: u64 = u64::MAX;

    #[test]
    fn test_fit_scaling_wide_source() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("wide.png");
        RgbImage::new(4000, 2000).save(&source).unwrap();

        let thumb = decode_and_fit(&source, ThumbnailSize::new(200, 200), NO_CEILING).unwrap();
        assert!(thumb.width() <= 200 && thumb.height() <= 200);
        assert_eq!(thumb.dimensions(), (200, 100));
    }

    #[test]
    fn test_fit_dimensions() {
        let target = ThumbnailSize::new(200, 200);
        assert_eq!(fit_dimensions((4000, 2000), target), (200, 100));
        assert_eq!(fit_dimensions((1000, 3000), target), (67, 200));
        // Small images are never upscaled
        assert_eq!(fit_dimensions((120, 80), target), (120, 80));
        // Extreme aspect ratios keep at least one pixel
        assert_eq!(fit_dimensions((10000, 1), target), (200, 1));
    }

    #[test]
    fn test_small_source_keeps_dimensions() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("small.png");
        RgbImage::new(50, 40).save(&source).unwrap();

        let thumb = decode_and_fit(&source, ThumbnailSize::new(200, 200), NO_CEILING).unwrap();
        assert_eq!(thumb.dimensions(), (50, 40));
    }

    #[test]
    fn test_alpha_flattened_onto_white() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("transparent.png");
        RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 0])).save(&source).unwrap();

        let thumb = decode_and_fit(&source, ThumbnailSize::new(200, 200), NO_CEILING).unwrap();
        assert_eq!(*thumb.get_pixel(5, 5), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_corrupt_source_is_decode_error() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("broken.jpg");
        fs::write(&source, b"\xFF\xD8\xFF\xE0 definitely not a jpeg").unwrap();

        let err = decode_and_fit(&source, ThumbnailSize::new(200, 200), NO_CEILING).unwrap_err();
        assert_eq!(err.path(), &source);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let err = decode_and_fit(
            Path::new("/no/such/page.png"),
            ThumbnailSize::new(200, 200),
            NO_CEILING,
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Io { .. }));
    }

    #[test]
    fn test_pixel_ceiling() {
        let temp_dir = tempdir().unwrap();
        let source = temp_dir.path().join("big.png");
        RgbImage::new(100, 100).save(&source).unwrap();

        let err = decode_and_fit(&source, ThumbnailSize::new(50, 50), 9_999).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { width: 100, height: 100, .. }));
    }
}
