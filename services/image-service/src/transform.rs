use crate::error::{Failure, PipelineOutcome};
use image::ImageFormat;
use std::io::Cursor;
use tracing::error;

/// Canonical output encoding of the transform stage
pub const OUTPUT_FORMAT: ImageFormat = ImageFormat::Png;

/// Mirrored image bytes, always PNG encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub bytes: Vec<u8>,
}

impl ProcessedImage {
    pub fn content_type(&self) -> &'static str {
        OUTPUT_FORMAT.to_mime_type()
    }
}

/// Mirror an image across its vertical axis and re-encode it as PNG
///
/// The input format is sniffed from the bytes. No partial output is
/// returned on failure.
pub fn mirror(bytes: &[u8]) -> PipelineOutcome<ProcessedImage> {
    let img = image::load_from_memory(bytes).map_err(|e| {
        error!(error = %e, "image decode failed");
        Failure::transform_failed()
    })?;

    let mut buf = Cursor::new(Vec::new());
    img.fliph().write_to(&mut buf, OUTPUT_FORMAT).map_err(|e| {
        error!(error = %e, "PNG encode failed");
        Failure::transform_failed()
    })?;

    Ok(ProcessedImage {
        bytes: buf.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 40) as u8, (y * 30) as u8, 128, if x == 0 { 0 } else { 255 }])
        });
        DynamicImage::ImageRgba8(img)
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_mirror_reflects_columns() {
        let original = gradient(5, 3);
        let output = mirror(&encode(&original, ImageFormat::Png)).unwrap();

        assert_eq!(&output.bytes[0..8], &PNG_MAGIC);

        let mirrored = image::load_from_memory(&output.bytes).unwrap();
        assert_eq!(mirrored.dimensions(), (5, 3));
        for y in 0..3 {
            for x in 0..5 {
                assert_eq!(mirrored.get_pixel(x, y), original.get_pixel(4 - x, y));
            }
        }
    }

    #[test]
    fn test_mirror_twice_is_identity() {
        let original = gradient(7, 4);
        let once = mirror(&encode(&original, ImageFormat::Png)).unwrap();
        let twice = mirror(&once.bytes).unwrap();

        let restored = image::load_from_memory(&twice.bytes).unwrap();
        assert_eq!(restored.to_rgba8(), original.to_rgba8());
    }

    #[test]
    fn test_jpeg_input_becomes_png() {
        let original = DynamicImage::new_rgb8(8, 8);
        let output = mirror(&encode(&original, ImageFormat::Jpeg)).unwrap();

        assert_eq!(&output.bytes[0..8], &PNG_MAGIC);
        assert_eq!(output.content_type(), "image/png");
    }

    #[test]
    fn test_undecodable_input() {
        let err = mirror(b"definitely not an image").unwrap_err();
        assert_eq!(err.kind, FailureKind::TransformFailed);
        assert_eq!(err.message, "Image processing failed.");
    }
}
