//! Image normalization for stored previews and results.
//!
//! Every image kept in the history log passes through [`normalize`], which
//! shrinks it to bounded dimensions and re-encodes it as JPEG. Anything that
//! cannot be decoded is kept as-is: an oversized entry is still usable,
//! a missing one is not.

use crate::data_url::{parse_data_url, to_data_url};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tracing::debug;

/// Default bound for both dimensions of stored images.
pub const DEFAULT_MAX_DIMENSION: u32 = 800;

/// Default JPEG quality, on a 0.0 to 1.0 scale.
pub const DEFAULT_QUALITY: f32 = 0.8;

/// Limits applied to stored images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality in (0.0, 1.0].
    pub quality: f32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_DIMENSION,
            max_height: DEFAULT_MAX_DIMENSION,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl NormalizeOptions {
    pub fn apply(&self, encoded: &str) -> String {
        normalize(encoded, self.max_width, self.max_height, self.quality)
    }
}

/// Shrink an embedded image and re-encode it as JPEG.
///
/// Input that is not a `data:image` URL, or that fails to decode or
/// encode, is returned unchanged.
pub fn normalize(encoded: &str, max_width: u32, max_height: u32, quality: f32) -> String {
    if !encoded.starts_with("data:image") {
        return encoded.to_string();
    }

    match try_normalize(encoded, max_width, max_height, quality) {
        Ok(normalized) => normalized,
        Err(reason) => {
            debug!(target: "farmhand::normalize", "Keeping original image: {}", reason);
            encoded.to_string()
        }
    }
}

fn try_normalize(
    encoded: &str,
    max_width: u32,
    max_height: u32,
    quality: f32,
) -> Result<String, String> {
    let data = parse_data_url(encoded).ok_or_else(|| "malformed data URL".to_string())?;
    let img = image::load_from_memory(&data.bytes).map_err(|e| e.to_string())?;

    let (width, height) = fit_dimensions(img.width(), img.height(), max_width, max_height);
    let resized = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let rgb = resized.to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality));
    encoder.encode_image(&rgb).map_err(|e| e.to_string())?;

    debug!(
        target: "farmhand::normalize",
        from = data.bytes.len(),
        to = bytes.len(),
        "Normalized image to {}x{}",
        width,
        height
    );

    Ok(to_data_url("image/jpeg", &bytes))
}

/// Target size that keeps the aspect ratio and clamps the larger side.
///
/// Landscape images are bounded by `max_width`, square and portrait ones
/// by `max_height`. Images already within bounds keep their size.
pub fn fit_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width > height {
        if width > max_width {
            let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
            return (max_width, scaled.max(1));
        }
    } else if height > max_height {
        let scaled = (width as f64 * max_height as f64 / height as f64).round() as u32;
        return (scaled.max(1), max_height);
    }
    (width, height)
}

fn jpeg_quality(quality: f32) -> u8 {
    let quality = if quality.is_finite() { quality } else { DEFAULT_QUALITY };
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}
