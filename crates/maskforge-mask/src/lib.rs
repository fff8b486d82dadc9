#![warn(missing_docs)]
//! # maskforge-mask
//!
//! ## Purpose
//! Derives binary edit masks from annotated drawing surfaces and builds the
//! expanded canvas plus preserve mask used for outpainting.
//!
//! ## Responsibilities
//! - Diff an annotated layer against its clean re-render ([`derive_mask`]).
//! - Build the 2x outpainting canvas and its inverse mask ([`build_expansion`]).
//! - Validate submitted image/mask pairs before they reach a backend.
//!
//! ## Data flow
//! Clean composite + annotated stroke layer -> [`derive_mask`] -> [`EditMask`].
//! Source image -> [`build_expansion`] -> [`Expansion`] with a
//! [`PreserveMask`].
//!
//! ## Ownership and lifetimes
//! Both mask types own their bitmaps. Inputs are borrowed and never modified.
//!
//! ## Error model
//! Geometry and polarity violations return [`MaskError`].
//!
//! ## Polarity
//! The two mask types mean opposite things and are kept as distinct types:
//! white pixels of an [`EditMask`] mark the region to edit, while the
//! transparent cut-out of a [`PreserveMask`] marks the region to leave
//! untouched.

use std::fmt;
use std::str::FromStr;

use maskforge_canvas::{CanvasError, center_offset, place_unscaled};
use maskforge_core::{BinaryImage, Bitmap, CoreError, Rgba};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outpainting canvas size as a multiple of the source size on each axis.
pub const EXPANSION_FACTOR: u32 = 2;

/// Binary edit mask: opaque white = edit, opaque black = keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditMask(Bitmap);

impl EditMask {
    /// Wraps a bitmap after checking it holds only opaque black and opaque
    /// white.
    ///
    /// # Errors
    /// Returns [`MaskError::NotBinary`] at the first offending pixel.
    pub fn from_bitmap(bitmap: Bitmap) -> Result<Self, MaskError> {
        if let Some(index) = bitmap
            .pixels()
            .position(|px| px != Rgba::OPAQUE_BLACK && px != Rgba::OPAQUE_WHITE)
        {
            return Err(MaskError::NotBinary { index });
        }
        Ok(Self(bitmap))
    }

    /// Underlying bitmap.
    pub fn as_bitmap(&self) -> &Bitmap {
        &self.0
    }

    /// Consumes the mask.
    pub fn into_bitmap(self) -> Bitmap {
        self.0
    }

    /// Number of pixels marked for editing.
    pub fn edited_pixel_count(&self) -> usize {
        self.0
            .pixels()
            .filter(|px| *px == Rgba::OPAQUE_WHITE)
            .count()
    }

    /// Encodes the mask as a PNG part.
    ///
    /// # Errors
    /// Returns [`MaskError::Core`] when encoding fails.
    pub fn to_png_part(&self) -> Result<BinaryImage, MaskError> {
        Ok(self.0.to_png_part()?)
    }
}

/// Outpainting mask: opaque everywhere except a fully transparent cut-out over
/// the region to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreserveMask(Bitmap);

impl PreserveMask {
    /// Wraps a bitmap after checking every alpha is either 0 or 255.
    ///
    /// # Errors
    /// Returns [`MaskError::PartialAlpha`] at the first offending pixel.
    pub fn from_bitmap(bitmap: Bitmap) -> Result<Self, MaskError> {
        if let Some(index) = bitmap
            .pixels()
            .position(|px| px.alpha() != 0 && px.alpha() != 255)
        {
            return Err(MaskError::PartialAlpha { index });
        }
        Ok(Self(bitmap))
    }

    /// Underlying bitmap.
    pub fn as_bitmap(&self) -> &Bitmap {
        &self.0
    }

    /// Returns `true` when `(x, y)` lies in the preserved cut-out.
    pub fn is_preserved(&self, x: u32, y: u32) -> bool {
        self.0.pixel(x, y).is_some_and(|px| px.alpha() == 0)
    }

    /// Encodes the mask as a PNG part.
    ///
    /// # Errors
    /// Returns [`MaskError::Core`] when encoding fails.
    pub fn to_png_part(&self) -> Result<BinaryImage, MaskError> {
        Ok(self.0.to_png_part()?)
    }
}

/// Derives the edit mask from a clean render and its annotated counterpart.
///
/// A pixel is white when its red, green, or blue channel differs between the
/// two layers and black otherwise. Alpha is not compared: strokes are drawn
/// translucent for feedback, but any visible color change counts as edited.
/// `original` must be composited with the same transform as the annotated
/// layer's base.
///
/// # Errors
/// Returns [`MaskError::DimensionMismatch`] when the layers differ in size.
pub fn derive_mask(original: &Bitmap, annotated: &Bitmap) -> Result<EditMask, MaskError> {
    if original.dimensions() != annotated.dimensions() {
        return Err(MaskError::DimensionMismatch {
            expected: original.dimensions(),
            actual: annotated.dimensions(),
        });
    }

    let mut rgba = Vec::with_capacity(original.as_rgba().len());
    for (before, after) in original
        .as_rgba()
        .chunks_exact(4)
        .zip(annotated.as_rgba().chunks_exact(4))
    {
        let edited = before[..3] != after[..3];
        let value = if edited {
            Rgba::OPAQUE_WHITE
        } else {
            Rgba::OPAQUE_BLACK
        };
        rgba.extend_from_slice(&value.0);
    }

    let (width, height) = original.dimensions();
    Ok(EditMask(Bitmap::new(width, height, rgba)?))
}

/// Placement rectangle of the source inside the expanded canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Source width.
    pub width: u32,
    /// Source height.
    pub height: u32,
}

impl Placement {
    /// Returns `true` when `(x, y)` lies inside the rectangle.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Outpainting inputs built from one source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// White canvas with the source drawn at `placement`.
    pub expanded_image: Bitmap,
    /// Opaque black with a transparent cut-out at `placement`.
    pub preserve_mask: PreserveMask,
    /// Where the source sits in the expanded canvas.
    pub placement: Placement,
}

/// Builds the [`EXPANSION_FACTOR`]x canvas and preserve mask for `image`.
///
/// The source is centered with the compositor's [`center_offset`], which
/// gives `(W/2, H/2)` for even sizes and rounds half-pixels up.
///
/// # Errors
/// Returns [`MaskError::Overflow`] when the expanded size does not fit `u32`.
pub fn build_expansion(image: &Bitmap) -> Result<Expansion, MaskError> {
    let (width, height) = image.dimensions();
    let canvas_width = width
        .checked_mul(EXPANSION_FACTOR)
        .ok_or(MaskError::Overflow)?;
    let canvas_height = height
        .checked_mul(EXPANSION_FACTOR)
        .ok_or(MaskError::Overflow)?;

    let placement = Placement {
        x: center_offset(width, canvas_width),
        y: center_offset(height, canvas_height),
        width,
        height,
    };

    let expanded_image = place_unscaled(
        image,
        canvas_width,
        canvas_height,
        placement.x,
        placement.y,
        Rgba::OPAQUE_WHITE,
    )?;

    let mut rgba = Vec::with_capacity(canvas_width as usize * canvas_height as usize * 4);
    for y in 0..canvas_height {
        for x in 0..canvas_width {
            let value = if placement.contains(x, y) {
                Rgba::TRANSPARENT
            } else {
                Rgba::OPAQUE_BLACK
            };
            rgba.extend_from_slice(&value.0);
        }
    }
    let preserve_mask = PreserveMask(Bitmap::new(canvas_width, canvas_height, rgba)?);

    Ok(Expansion {
        expanded_image,
        preserve_mask,
        placement,
    })
}

/// Which mask semantics accompany an edit submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskKind {
    /// White marks the region to edit.
    #[default]
    Edit,
    /// Transparent cut-out marks the region to keep.
    Preserve,
}

impl MaskKind {
    /// Wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            MaskKind::Edit => "edit",
            MaskKind::Preserve => "preserve",
        }
    }
}

impl fmt::Display for MaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskKind {
    type Err = MaskError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "edit" => Ok(MaskKind::Edit),
            "preserve" => Ok(MaskKind::Preserve),
            other => Err(MaskError::UnknownKind(other.to_string())),
        }
    }
}

/// Decodes a submitted image/mask pair and enforces the mask invariants.
///
/// Returns the shared `(width, height)` on success.
///
/// # Errors
/// - [`MaskError::Core`] when either payload fails to decode.
/// - [`MaskError::DimensionMismatch`] when sizes differ.
/// - [`MaskError::NotBinary`] / [`MaskError::PartialAlpha`] when the mask
///   violates the invariant of its `kind`.
pub fn validate_mask_pairing(
    image_bytes: &[u8],
    mask_bytes: &[u8],
    kind: MaskKind,
) -> Result<(u32, u32), MaskError> {
    let image = Bitmap::decode(image_bytes)?;
    let mask = Bitmap::decode(mask_bytes)?;

    if image.dimensions() != mask.dimensions() {
        return Err(MaskError::DimensionMismatch {
            expected: image.dimensions(),
            actual: mask.dimensions(),
        });
    }

    match kind {
        MaskKind::Edit => {
            EditMask::from_bitmap(mask)?;
        }
        MaskKind::Preserve => {
            PreserveMask::from_bitmap(mask)?;
        }
    }

    Ok(image.dimensions())
}

/// Error type for mask derivation and validation.
#[derive(Debug, Error)]
pub enum MaskError {
    /// Layers or image/mask pair differ in size.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Reference `(width, height)`.
        expected: (u32, u32),
        /// Offending `(width, height)`.
        actual: (u32, u32),
    },
    /// Edit mask contains a pixel other than opaque black/white.
    #[error("edit mask is not binary at pixel {index}")]
    NotBinary {
        /// Row-major pixel index.
        index: usize,
    },
    /// Preserve mask contains partial transparency.
    #[error("preserve mask has partial alpha at pixel {index}")]
    PartialAlpha {
        /// Row-major pixel index.
        index: usize,
    },
    /// Unrecognized mask kind label.
    #[error("unknown mask kind: {0}")]
    UnknownKind(String),
    /// Expanded canvas size overflowed.
    #[error("expanded canvas dimension overflow")]
    Overflow,
    /// Bitmap construction or decoding failed.
    #[error("bitmap error: {0}")]
    Core(#[from] CoreError),
    /// Compositing failed.
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),
}
