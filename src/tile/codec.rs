//! Image decoding and encoding at the tile boundary.
//!
//! Cached payloads are opaque bytes. They are only decoded here, when a tile
//! image is assembled, and assembled images are only encoded here, when they
//! are written out.
//!
//! # Design Decisions
//!
//! - **RGB only**: fetched tiles are converted to 8-bit RGB whatever their
//!   source format, matching the 3 channels of a slide view.
//!
//! - **JPEG and PNG output**: the output format follows the file extension.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbImage};

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Decoding
// =============================================================================

/// Decode a fetched payload into an RGB image.
///
/// The format is guessed from the payload itself.
pub fn decode_rgb(source: &[u8]) -> Result<RgbImage, TileError> {
    let reader = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| TileError::DecodeError {
            message: e.to_string(),
        })?;

    let image = reader.decode().map_err(|e| TileError::DecodeError {
        message: e.to_string(),
    })?;

    Ok(image.to_rgb8())
}

/// Decode a native tile and check that it is `width` x `height`.
pub fn decode_tile(source: &[u8], width: u32, height: u32) -> Result<RgbImage, TileError> {
    let image = decode_rgb(source)?;
    if image.dimensions() != (width, height) {
        return Err(TileError::InvalidSize {
            expected_width: width,
            expected_height: height,
            actual_width: image.width(),
            actual_height: image.height(),
        });
    }
    Ok(image)
}

// =============================================================================
// Encoding
// =============================================================================

/// Output format for `path`, from its extension.
pub fn output_format(path: &Path) -> Result<ImageFormat, TileError> {
    match ImageFormat::from_path(path) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Ok(format),
        Ok(format) => Err(TileError::EncodeError {
            message: format!("unsupported output format {:?}", format),
        }),
        Err(_) => Err(TileError::EncodeError {
            message: format!("cannot infer image format from '{}'", path.display()),
        }),
    }
}

/// Encode an assembled image.
///
/// `quality` only applies to JPEG and is clamped to 1-100.
pub fn encode(image: &RgbImage, format: ImageFormat, quality: u8) -> Result<Bytes, TileError> {
    let mut output = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
            encoder.encode_image(image)
        }
        ImageFormat::Png => PngEncoder::new(&mut output).write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        ),
        other => {
            return Err(TileError::EncodeError {
                message: format!("unsupported output format {:?}", other),
            })
        }
    }
    .map_err(|e| TileError::EncodeError {
        message: e.to_string(),
    })?;

    Ok(Bytes::from(output))
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
