//! Photo evidence preparation: decode, cap the longer edge, re-encode as JPEG.

use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageEncoder};

use crate::AuditError;

pub const MAX_EDGE: u32 = 800;
/// 0.85 on the usual 0-1 quality scale.
pub const JPEG_QUALITY: u8 = 85;
pub const MIME_TYPE: &str = "image/jpeg";
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Raw base64 JPEG bytes, no data-URI header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPayload(String);

impl TransportPayload {
    pub fn new(base64: impl Into<String>) -> Self {
        Self(base64.into())
    }

    /// Strip everything up to and including the first comma of a data URI.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let (_, body) = uri.split_once(',')?;
        Some(Self(body.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    /// `data:image/jpeg;base64,...`, for rendering and history snapshots.
    pub display: String,
    pub payload: TransportPayload,
}

/// Target dimensions: the longer edge becomes `max` when either edge exceeds
/// it, aspect ratio kept; otherwise unchanged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }
    let scale = |edge: u32, long: u32| -> u32 {
        ((edge as f64 * max as f64) / long as f64).round().max(1.0) as u32
    };
    if width > height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, AuditError> {
    if bytes.is_empty() {
        return Err(AuditError::ImageLoad("empty file".to_string()));
    }
    let decoded =
        image::load_from_memory(bytes).map_err(|e| AuditError::ImageLoad(e.to_string()))?;

    let (width, height) = fit_within(decoded.width(), decoded.height(), MAX_EDGE);
    let resized = if (width, height) == (decoded.width(), decoded.height()) {
        decoded
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle)
    };

    // JPEG has no alpha channel.
    let rgb = resized.to_rgb8();
    let mut jpeg = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| AuditError::ImageLoad(e.to_string()))?;

    let display = format!("{DATA_URI_PREFIX}{}", STANDARD.encode(jpeg.get_ref()));
    let payload = TransportPayload::from_data_uri(&display)
        .ok_or_else(|| AuditError::ImageLoad("encoded image has no data".to_string()))?;

    tracing::debug!(
        width,
        height,
        payload_bytes = payload.len(),
        "prepared image evidence"
    );

    Ok(PreparedImage {
        width,
        height,
        display,
        payload,
    })
}

pub fn prepare_image_file(path: &Path) -> Result<PreparedImage, AuditError> {
    let bytes = std::fs::read(path)
        .map_err(|e| AuditError::ImageLoad(format!("{}: {e}", path.display())))?;
    prepare_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([120, 90, 60, 200]),
        ));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn fit_caps_longer_edge() {
        assert_eq!(fit_within(1600, 900, 800), (800, 450));
        assert_eq!(fit_within(900, 1600, 800), (450, 800));
        assert_eq!(fit_within(1000, 1000, 800), (800, 800));
        assert_eq!(fit_within(4000, 3, 800), (800, 1));
    }

    #[test]
    fn fit_keeps_small_images() {
        assert_eq!(fit_within(640, 480, 800), (640, 480));
        assert_eq!(fit_within(800, 800, 800), (800, 800));
    }

    #[test]
    fn fit_preserves_aspect_within_a_pixel() {
        for (w, h) in [(1234, 987), (3001, 17), (801, 799), (2000, 1333)] {
            let (nw, nh) = fit_within(w, h, MAX_EDGE);
            assert_eq!(nw.max(nh), MAX_EDGE);
            let expected = if w > h {
                h as f64 * MAX_EDGE as f64 / w as f64
            } else {
                w as f64 * MAX_EDGE as f64 / h as f64
            };
            let short = nw.min(nh) as f64;
            assert!((short - expected).abs() <= 1.0, "{w}x{h} -> {nw}x{nh}");
        }
    }

    #[test]
    fn large_png_is_downsampled_to_jpeg() {
        let prepared = prepare_image(&png(1600, 1200)).unwrap();
        assert_eq!((prepared.width, prepared.height), (800, 600));
        assert!(prepared.display.starts_with(DATA_URI_PREFIX));
        assert!(!prepared.payload.as_str().starts_with("data:"));

        let bytes = STANDARD.decode(prepared.payload.as_str()).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 600));
    }

    #[test]
    fn reprefixed_payload_is_the_display_uri() {
        let prepared = prepare_image(&png(32, 20)).unwrap();
        assert_eq!((prepared.width, prepared.height), (32, 20));
        assert_eq!(
            format!("{DATA_URI_PREFIX}{}", prepared.payload.as_str()),
            prepared.display
        );
    }

    #[test]
    fn corrupt_bytes_fail_to_load() {
        let err = prepare_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, AuditError::ImageLoad(_)));
        assert!(matches!(prepare_image(&[]), Err(AuditError::ImageLoad(_))));
    }

    #[test]
    fn data_uri_stripping() {
        let p = TransportPayload::from_data_uri("data:image/jpeg;base64,QUJD").unwrap();
        assert_eq!(p.as_str(), "QUJD");
        assert!(TransportPayload::from_data_uri("no header").is_none());
    }
}
