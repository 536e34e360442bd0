//! Resolution transformer: one decoded upload in, every configured
//! variant out.

use std::collections::HashMap;
use std::io::Cursor;

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

use crate::error::{PipelineError, Result};

/// JPEG quality for derived variants.
const JPEG_QUALITY: u8 = 85;

/// Name of the passthrough entry carrying the unmodified upload.
pub const ORIGINAL: &str = "original";

/// Fixed output resolutions. Adding an entry here is the only change
/// needed to produce a new variant.
pub const RESOLUTIONS: &[Resolution] = &[
    Resolution {
        name: "thumbnail",
        width: 150,
        height: 150,
    },
    Resolution {
        name: "small",
        width: 480,
        height: 480,
    },
    Resolution {
        name: "medium",
        width: 1024,
        height: 1024,
    },
    Resolution {
        name: "large",
        width: 1920,
        height: 1920,
    },
];

/// A named target output size.
#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
}

/// One resized variant, ready for upload.
#[derive(Debug)]
pub struct ResizedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Derives every configured resolution plus `original` from one upload.
///
/// Cover fit: each variant fills its target box exactly, cropping overflow
/// around the center; nothing is letterboxed. The `original` entry keeps
/// the input bytes and native dimensions. Undecodable input is rejected as
/// `UnsupportedFormat`, and any per-resolution failure aborts the whole
/// transform; a partial variant set is never returned.
pub fn transform(data: &[u8]) -> Result<HashMap<String, ResizedImage>> {
    let img = image::load_from_memory(data)
        .map_err(|e| PipelineError::UnsupportedFormat(e.to_string()))?;
    let (width, height) = img.dimensions();

    let mut variants = HashMap::with_capacity(RESOLUTIONS.len() + 1);
    for resolution in RESOLUTIONS {
        let resized = img.resize_to_fill(resolution.width, resolution.height, FilterType::Triangle);
        variants.insert(
            resolution.name.to_string(),
            ResizedImage {
                data: encode_jpeg(&resized)?,
                width: resolution.width,
                height: resolution.height,
            },
        );
    }

    variants.insert(
        ORIGINAL.to_string(),
        ResizedImage {
            data: Bytes::copy_from_slice(data),
            width,
            height,
        },
    );

    Ok(variants)
}

/// `transform` on the blocking thread pool; decode, resize and encode are
/// CPU bound and must not stall the async runtime.
pub async fn transform_async(data: Bytes) -> Result<HashMap<String, ResizedImage>> {
    tokio::task::spawn_blocking(move || transform(&data))
        .await
        .map_err(|e| PipelineError::Transform(format!("resize task panicked: {e}")))?
}

/// Human-readable byte-size label: derived variants in KB, the original
/// entry in MB.
pub fn size_label(name: &str, len: usize) -> String {
    if name == ORIGINAL {
        format!("{:.2}MB", len as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2}KB", len as f64 / 1024.0)
    }
}

fn encode_jpeg(img: &DynamicImage) -> Result<Bytes> {
    // JPEG carries no alpha channel, so flatten to RGB first
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .map_err(|e| PipelineError::Transform(e.to_string()))?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img =
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(width, height, Rgba([80u8, 120, 160, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_transform_produces_every_resolution() {
        let variants = transform(&png_bytes(640, 480)).unwrap();

        assert_eq!(variants.len(), RESOLUTIONS.len() + 1);
        for resolution in RESOLUTIONS {
            let v = variants.get(resolution.name).unwrap();
            assert_eq!((v.width, v.height), (resolution.width, resolution.height));
        }

        let original = variants.get(ORIGINAL).unwrap();
        assert_eq!((original.width, original.height), (640, 480));
    }

    #[test]
    fn test_cover_fit_output_is_exact() {
        // 640x480 does not share the thumbnail's aspect ratio, so a
        // letterboxing implementation would come out short of 150x150
        let variants = transform(&png_bytes(640, 480)).unwrap();
        let thumbnail = variants.get("thumbnail").unwrap();

        let decoded = image::load_from_memory(&thumbnail.data).unwrap();
        assert_eq!(decoded.dimensions(), (150, 150));
    }

    #[test]
    fn test_original_bytes_pass_through_unmodified() {
        let input = png_bytes(320, 200);
        let variants = transform(&input).unwrap();

        assert_eq!(variants.get(ORIGINAL).unwrap().data.as_ref(), &input[..]);
    }

    #[test]
    fn test_undecodable_input_is_rejected() {
        let err = transform(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_transform_is_idempotent() {
        let input = png_bytes(300, 500);
        let first = transform(&input).unwrap();
        let second = transform(&input).unwrap();

        assert_eq!(first.len(), second.len());
        for (name, variant) in &first {
            let other = second.get(name).unwrap();
            assert_eq!((variant.width, variant.height), (other.width, other.height));
        }
    }

    #[test]
    fn test_size_labels() {
        assert_eq!(size_label("thumbnail", 2048), "2.00KB");
        assert_eq!(size_label(ORIGINAL, 3 * 1024 * 1024), "3.00MB");
    }
}
