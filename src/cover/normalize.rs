//! Cover image normalization.
//!
//! Embedded covers often carry CMYK data or ICC profiles that browsers
//! render badly. Decoding and re-encoding through `image` drops the profile.
//! JPEG and PNG keep their format; anything else decodable becomes PNG.

use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Deterministic, infallible image cleanup.
pub trait ImageNormalizer: Send + Sync {
    /// Returns normalized bytes and their MIME type, or the input unchanged
    /// when it cannot be processed.
    fn normalize(&self, data: &[u8], mime_type: &str) -> (Vec<u8>, String);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ColorProfileNormalizer;

impl ColorProfileNormalizer {
    fn try_normalize(data: &[u8]) -> Result<(Vec<u8>, &'static str), image::ImageError> {
        let format = image::guess_format(data)?;
        let decoded = image::load_from_memory_with_format(data, format)?;

        let (image, target, mime) = match format {
            ImageFormat::Jpeg => (
                DynamicImage::ImageRgb8(decoded.to_rgb8()),
                ImageFormat::Jpeg,
                "image/jpeg",
            ),
            _ => (decoded, ImageFormat::Png, "image/png"),
        };

        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, target)?;
        Ok((out.into_inner(), mime))
    }
}

impl ImageNormalizer for ColorProfileNormalizer {
    fn normalize(&self, data: &[u8], mime_type: &str) -> (Vec<u8>, String) {
        match Self::try_normalize(data) {
            Ok((bytes, mime)) => (bytes, mime.to_string()),
            Err(e) => {
                tracing::debug!(target: "shelf_scan::cover", error = %e, "Keeping cover as-is");
                (data.to_vec(), mime_type.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_jpeg_stays_jpeg() {
        let (bytes, mime) = ColorProfileNormalizer.normalize(&encoded(ImageFormat::Jpeg), "image/jpeg");
        assert_eq!(mime, "image/jpeg");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_png_stays_png() {
        let (bytes, mime) = ColorProfileNormalizer.normalize(&encoded(ImageFormat::Png), "image/png");
        assert_eq!(mime, "image/png");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_other_formats_become_png() {
        let (bytes, mime) = ColorProfileNormalizer.normalize(&encoded(ImageFormat::Bmp), "image/bmp");
        assert_eq!(mime, "image/png");
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn test_garbage_is_returned_unchanged() {
        let data = b"definitely not an image".to_vec();
        let (bytes, mime) = ColorProfileNormalizer.normalize(&data, "image/jpeg");
        assert_eq!(bytes, data);
        assert_eq!(mime, "image/jpeg");
    }

    #[test]
    fn test_deterministic() {
        let input = encoded(ImageFormat::Png);
        let a = ColorProfileNormalizer.normalize(&input, "image/png");
        let b = ColorProfileNormalizer.normalize(&input, "image/png");
        assert_eq!(a, b);
    }
}
