#![warn(missing_docs)]
//! # maskforge-core
//!
//! ## Purpose
//! Defines the pure data model shared by every `maskforge` crate.
//!
//! ## Responsibilities
//! - Represent RGBA bitmaps with validated geometry.
//! - Encode/decode bitmaps to and from transport image formats.
//! - Model generation requests, safety verdicts, and normalized results.
//!
//! ## Data flow
//! Client code composites and annotates [`Bitmap`] values, encodes them as PNG
//! [`BinaryImage`] parts, and the server packages them into an [`EditRequest`].
//! Backend replies are decoded into exactly one [`GenerationResult`] variant.
//!
//! ## Ownership and lifetimes
//! Bitmaps and image parts own their backing buffers (`Vec<u8>`). A consumer
//! that needs different pixels builds a new bitmap instead of mutating the one
//! it was handed.
//!
//! ## Error model
//! Shape and codec failures return [`CoreError`] variants. Request-level
//! failures are classified with [`ErrorKind`].
//!
//! ## Example
//! ```rust
//! use maskforge_core::{Bitmap, Rgba};
//!
//! let bitmap = Bitmap::filled(2, 2, Rgba::OPAQUE_WHITE).unwrap();
//! assert_eq!(bitmap.pixel(1, 1), Some(Rgba::OPAQUE_WHITE));
//! ```

use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Media type used for every PNG part produced by this workspace.
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// One RGBA pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    /// Opaque black `(0, 0, 0, 255)`.
    pub const OPAQUE_BLACK: Rgba = Rgba([0, 0, 0, 255]);
    /// Opaque white `(255, 255, 255, 255)`.
    pub const OPAQUE_WHITE: Rgba = Rgba([255, 255, 255, 255]);
    /// Fully transparent black `(0, 0, 0, 0)`.
    pub const TRANSPARENT: Rgba = Rgba([0, 0, 0, 0]);

    /// Builds a pixel from its four channels.
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self([red, green, blue, alpha])
    }

    /// Alpha channel.
    pub const fn alpha(self) -> u8 {
        self.0[3]
    }

    /// Returns `true` when red, green, or blue differ. Alpha is ignored.
    pub fn color_differs(self, other: Rgba) -> bool {
        self.0[..3] != other.0[..3]
    }
}

/// Width, height, and contiguous row-major RGBA buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl Bitmap {
    /// Constructs a validated bitmap.
    ///
    /// # Errors
    /// Returns [`CoreError::ZeroDimension`] when either side is zero and
    /// [`CoreError::InvalidBitmapShape`] when the buffer length is not exactly
    /// `width * height * 4`.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CoreError> {
        let expected_len = required_rgba_len(width, height)?;
        if rgba.len() != expected_len {
            return Err(CoreError::InvalidBitmapShape {
                expected: expected_len,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Creates a bitmap where every pixel is `color`.
    ///
    /// # Errors
    /// Same geometry errors as [`Bitmap::new`].
    pub fn filled(width: u32, height: u32, color: Rgba) -> Result<Self, CoreError> {
        let len = required_rgba_len(width, height)?;
        let mut rgba = Vec::with_capacity(len);
        for _ in 0..len / 4 {
            rgba.extend_from_slice(&color.0);
        }
        Self::new(width, height, rgba)
    }

    /// Decodes PNG/JPEG/WebP bytes into an RGBA bitmap.
    ///
    /// # Errors
    /// Returns [`CoreError::ImageCodec`] when the bytes are not a supported
    /// image.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        Self::from_rgba_image(decoded)
    }

    /// Encodes the bitmap as PNG bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::ImageCodec`] when encoding fails.
    pub fn to_png(&self) -> Result<Vec<u8>, CoreError> {
        let mut out = Cursor::new(Vec::new());
        self.to_rgba_image()?
            .write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Wraps the PNG encoding as a typed image part.
    ///
    /// # Errors
    /// Returns [`CoreError::ImageCodec`] when encoding fails.
    pub fn to_png_part(&self) -> Result<BinaryImage, CoreError> {
        Ok(BinaryImage::new(PNG_MEDIA_TYPE, self.to_png()?))
    }

    /// Copies pixels into an `image` crate buffer for resampling/compositing.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidBitmapShape`] if the internal buffer does
    /// not match the declared geometry.
    pub fn to_rgba_image(&self) -> Result<RgbaImage, CoreError> {
        let expected = required_rgba_len(self.width, self.height)?;
        RgbaImage::from_raw(self.width, self.height, self.rgba.clone()).ok_or(
            CoreError::InvalidBitmapShape {
                expected,
                actual: self.rgba.len(),
            },
        )
    }

    /// Takes ownership of an `image` crate buffer.
    ///
    /// # Errors
    /// Returns [`CoreError::ZeroDimension`] for empty images.
    pub fn from_rgba_image(image: RgbaImage) -> Result<Self, CoreError> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)` pair.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of pixels.
    pub fn pixel_count(&self) -> usize {
        self.rgba.len() / 4
    }

    /// Raw RGBA bytes in row-major order.
    pub fn as_rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Consumes the bitmap and returns its buffer.
    pub fn into_rgba(self) -> Vec<u8> {
        self.rgba
    }

    /// Iterates pixels in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = Rgba> + '_ {
        self.rgba
            .chunks_exact(4)
            .map(|px| Rgba([px[0], px[1], px[2], px[3]]))
    }

    /// Returns the pixel at `(x, y)` or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.rgba[offset..offset + 4];
        Some(Rgba([px[0], px[1], px[2], px[3]]))
    }
}

/// Typed binary image payload (bytes plus declared media type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryImage {
    /// Declared media type, e.g. `image/png`.
    pub mime_type: String,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

impl BinaryImage {
    /// Creates an image part with an explicit media type.
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Creates an image part whose media type is sniffed from the bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::UnsupportedMediaType`] when the format cannot be
    /// recognized as PNG, JPEG, or WebP.
    pub fn sniffed(bytes: Vec<u8>) -> Result<Self, CoreError> {
        let mime_type = sniff_media_type(&bytes).ok_or(CoreError::UnsupportedMediaType)?;
        Ok(Self::new(mime_type, bytes))
    }
}

/// Returns the media type for recognized image bytes.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    match image::guess_format(bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

/// One discrete unit of a multi-part generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Plain text instruction or prompt.
    Text(String),
    /// Inline binary image.
    InlineImage(BinaryImage),
}

/// Masked edit request assembled from one multipart submission.
///
/// The request is consumed exactly once by [`EditRequest::into_parts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    /// User instruction text.
    pub prompt_text: String,
    /// Source image bytes.
    pub source_image: BinaryImage,
    /// Mask bytes, same pixel dimensions as `source_image`.
    pub mask: BinaryImage,
    /// Additional reference images, in submission order.
    pub auxiliary_images: Vec<BinaryImage>,
}

impl EditRequest {
    /// Splits the request into prompt text and ordered image parts
    /// `[source, mask, auxiliary...]`.
    pub fn into_parts(self) -> (String, Vec<BinaryImage>) {
        let mut images = Vec::with_capacity(2 + self.auxiliary_images.len());
        images.push(self.source_image);
        images.push(self.mask);
        images.extend(self.auxiliary_images);
        (self.prompt_text, images)
    }
}

/// Result of the keyword prefilter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    /// `true` when the text must not be processed.
    pub blocked: bool,
    /// Banned token that matched, when blocked.
    pub matched_token: Option<String>,
}

impl SafetyVerdict {
    /// Verdict for text that passed.
    pub fn pass() -> Self {
        Self {
            blocked: false,
            matched_token: None,
        }
    }

    /// Verdict for text that matched `token`.
    pub fn blocked(token: impl Into<String>) -> Self {
        Self {
            blocked: true,
            matched_token: Some(token.into()),
        }
    }
}

/// Classified failure kinds. Each maps to a distinct reported status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing field, dimension mismatch, or unreadable upload.
    Validation,
    /// Request text matched the keyword prefilter.
    SafetyRejection,
    /// Backend reported quota exhaustion.
    QuotaExceeded,
    /// Requested model is unknown or unavailable.
    ModelUnavailable,
    /// Backend reply had no recognizable structure.
    MalformedUpstreamResponse,
    /// Network, timeout, or other backend failure.
    Transport,
}

impl ErrorKind {
    /// Stable snake-case label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::SafetyRejection => "safety_rejection",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::MalformedUpstreamResponse => "malformed_upstream_response",
            ErrorKind::Transport => "transport",
        }
    }
}

/// Normalized outcome of one generation call. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationResult {
    /// Generated or edited image.
    Image {
        /// Remote URI, or a `data:` URI embedding the bytes.
        locator: String,
    },
    /// Backend answered in prose (answers and policy refusals).
    Text {
        /// Concatenated text content.
        explanation: String,
    },
    /// Classified failure.
    Error {
        /// Failure class.
        kind: ErrorKind,
        /// Diagnostic detail, never shown verbatim to end users.
        detail: String,
    },
}

impl GenerationResult {
    /// Shorthand for an error result.
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        GenerationResult::Error {
            kind,
            detail: detail.into(),
        }
    }
}

/// Error type for core model and codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Pixel buffer does not match declared geometry.
    #[error("invalid bitmap shape: expected {expected} bytes, got {actual}")]
    InvalidBitmapShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Width or height is zero.
    #[error("bitmap dimensions must be non-zero")]
    ZeroDimension,
    /// Integer overflow while computing buffer size.
    #[error("bitmap dimension overflow")]
    Overflow,
    /// Image could not be decoded or encoded.
    #[error("image codec failure: {0}")]
    ImageCodec(#[from] image::ImageError),
    /// Bytes are not a supported image format.
    #[error("unsupported image media type")]
    UnsupportedMediaType,
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    if width == 0 || height == 0 {
        return Err(CoreError::ZeroDimension);
    }

    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or(CoreError::Overflow)
}

#[cfg(test)]
mod tests {
    //! Unit tests for bitmap validation and pixel access.

    use super::*;

    #[test]
    fn rejects_buffer_with_wrong_length() {
        let error = Bitmap::new(2, 2, vec![0; 15]).expect_err("shape should be rejected");
        assert!(matches!(
            error,
            CoreError::InvalidBitmapShape {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(
            Bitmap::filled(0, 4, Rgba::OPAQUE_BLACK),
            Err(CoreError::ZeroDimension)
        ));
    }

    #[test]
    fn color_difference_ignores_alpha() {
        assert!(!Rgba::new(10, 20, 30, 0).color_differs(Rgba::new(10, 20, 30, 255)));
        assert!(Rgba::new(10, 20, 30, 255).color_differs(Rgba::new(10, 21, 30, 255)));
    }

    #[test]
    fn edit_request_orders_source_before_mask() {
        let request = EditRequest {
            prompt_text: "remove the lamp".to_string(),
            source_image: BinaryImage::new(PNG_MEDIA_TYPE, vec![1]),
            mask: BinaryImage::new(PNG_MEDIA_TYPE, vec![2]),
            auxiliary_images: vec![BinaryImage::new(PNG_MEDIA_TYPE, vec![3])],
        };

        let (prompt, images) = request.into_parts();
        assert_eq!(prompt, "remove the lamp");
        let order: Vec<u8> = images.iter().map(|image| image.bytes[0]).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
