#![warn(missing_docs)]
//! # maskforge-canvas
//!
//! ## Purpose
//! Places source images onto fixed-size drawing surfaces and renders freehand
//! annotation strokes over them.
//!
//! ## Responsibilities
//! - Compute the aspect-preserving, centered letterbox [`Transform`].
//! - Size drawing surfaces from their on-screen display size and pixel density.
//! - Composite a source [`Bitmap`] onto a surface with a given transform.
//! - Render stroke layers with a semi-transparent round brush.
//!
//! ## Data flow
//! Upload -> [`SurfaceGeometry::for_display`] -> [`composite`] ->
//! [`render_strokes`] (annotated layer). The clean re-render for mask
//! derivation calls [`composite`] again with the same inputs, so both layers
//! share one transform and one resampling path.
//!
//! ## Ownership and lifetimes
//! Every operation returns a freshly allocated [`Bitmap`]; input bitmaps are
//! borrowed read-only.
//!
//! ## Error model
//! Empty surfaces and bitmap construction failures return [`CanvasError`].

use image::imageops::{self, FilterType};
use maskforge_core::{Bitmap, CoreError, Rgba};
use thiserror::Error;

/// Minimum on-screen edge length (display units) of a drawing surface.
pub const MIN_DISPLAY_EDGE: u32 = 200;

/// Display size assumed when the hosting container cannot be measured.
pub const FALLBACK_DISPLAY_SIZE: (u32, u32) = (800, 600);

/// Default brush width in surface pixels.
pub const DEFAULT_BRUSH_WIDTH: f32 = 20.0;

/// Default brush color: red at half opacity.
pub const DEFAULT_BRUSH_COLOR: Rgba = Rgba::new(255, 0, 0, 128);

/// Scale and centering of a source image on a destination surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transform {
    /// Scaled image width on the surface.
    pub draw_width: u32,
    /// Scaled image height on the surface.
    pub draw_height: u32,
    /// Left padding.
    pub offset_x: u32,
    /// Top padding.
    pub offset_y: u32,
}

/// Computes the letterbox transform for a `src_w x src_h` image on a
/// `dst_w x dst_h` surface.
///
/// A relatively wider image is fit by width, otherwise by height; the scaled
/// image is centered with [`center_offset`]. Callers reject zero dimensions
/// before calling. Extremely thin images still get a one-pixel draw extent.
pub fn compute_transform(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Transform {
    let img_aspect = src_w as f64 / src_h as f64;
    let dst_aspect = dst_w as f64 / dst_h as f64;

    let (draw_width, draw_height) = if img_aspect > dst_aspect {
        (dst_w, round_extent(dst_w as f64 / img_aspect, dst_h))
    } else {
        (round_extent(dst_h as f64 * img_aspect, dst_w), dst_h)
    };

    Transform {
        draw_width,
        draw_height,
        offset_x: center_offset(draw_width, dst_w),
        offset_y: center_offset(draw_height, dst_h),
    }
}

/// Offset that centers an `inner` extent inside an `outer` extent,
/// `round((outer - inner) / 2)`.
pub fn center_offset(inner: u32, outer: u32) -> u32 {
    (outer.saturating_sub(inner) as f64 / 2.0).round() as u32
}

fn round_extent(value: f64, limit: u32) -> u32 {
    (value.round() as u32).clamp(1, limit)
}

/// Internal pixel resolution of a drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    /// Width in surface pixels.
    pub width: u32,
    /// Height in surface pixels.
    pub height: u32,
}

impl SurfaceSize {
    /// Creates a validated surface size.
    ///
    /// # Errors
    /// Returns [`CanvasError::EmptySurface`] when either side is zero.
    pub fn new(width: u32, height: u32) -> Result<Self, CanvasError> {
        if width == 0 || height == 0 {
            return Err(CanvasError::EmptySurface);
        }
        Ok(Self { width, height })
    }
}

/// On-screen display size paired with the surface resolution backing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    /// Display width in layout units.
    pub display_width: u32,
    /// Display height in layout units.
    pub display_height: u32,
    /// Backing resolution, display size scaled by pixel density.
    pub surface: SurfaceSize,
}

impl SurfaceGeometry {
    /// Derives the surface resolution from a measured display box.
    ///
    /// The display box is floored and clamped to [`MIN_DISPLAY_EDGE`]; the
    /// surface is that size times `device_pixel_ratio`, rounded. Non-finite or
    /// non-positive ratios are treated as `1.0`.
    pub fn for_display(display_width: f64, display_height: f64, device_pixel_ratio: f64) -> Self {
        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        let display_width = clamp_display_edge(display_width);
        let display_height = clamp_display_edge(display_height);

        Self {
            display_width,
            display_height,
            surface: SurfaceSize {
                width: ((display_width as f64 * dpr).round() as u32).max(1),
                height: ((display_height as f64 * dpr).round() as u32).max(1),
            },
        }
    }

    /// Geometry for an unmeasurable container.
    pub fn fallback(device_pixel_ratio: f64) -> Self {
        Self::for_display(
            FALLBACK_DISPLAY_SIZE.0 as f64,
            FALLBACK_DISPLAY_SIZE.1 as f64,
            device_pixel_ratio,
        )
    }

    /// Maps a pointer position in display units to surface pixels.
    pub fn to_surface_point(&self, x: f32, y: f32) -> (f32, f32) {
        let scale_x = self.surface.width as f32 / self.display_width as f32;
        let scale_y = self.surface.height as f32 / self.display_height as f32;
        (x * scale_x, y * scale_y)
    }
}

fn clamp_display_edge(value: f64) -> u32 {
    if !value.is_finite() || value < MIN_DISPLAY_EDGE as f64 {
        return MIN_DISPLAY_EDGE;
    }
    (value.floor() as u32).max(MIN_DISPLAY_EDGE)
}

/// Renders `source` onto a `surface`-sized bitmap filled with `background`,
/// scaled and centered by [`compute_transform`].
///
/// The same inputs always produce byte-identical output, which mask
/// derivation relies on.
///
/// # Errors
/// Returns [`CanvasError::Core`] when intermediate buffers cannot be built.
pub fn composite(
    source: &Bitmap,
    surface: SurfaceSize,
    background: Rgba,
) -> Result<(Bitmap, Transform), CanvasError> {
    let transform = compute_transform(
        source.width(),
        source.height(),
        surface.width,
        surface.height,
    );
    let bitmap = composite_with(source, surface, background, transform)?;
    Ok((bitmap, transform))
}

/// Renders `source` with an explicit, previously computed transform.
///
/// # Errors
/// Returns [`CanvasError::Core`] when intermediate buffers cannot be built.
pub fn composite_with(
    source: &Bitmap,
    surface: SurfaceSize,
    background: Rgba,
    transform: Transform,
) -> Result<Bitmap, CanvasError> {
    let mut canvas = Bitmap::filled(surface.width, surface.height, background)?.to_rgba_image()?;
    let source_image = source.to_rgba_image()?;

    let scaled = if (transform.draw_width, transform.draw_height) == source.dimensions() {
        source_image
    } else {
        imageops::resize(
            &source_image,
            transform.draw_width,
            transform.draw_height,
            FilterType::Triangle,
        )
    };

    imageops::overlay(
        &mut canvas,
        &scaled,
        transform.offset_x as i64,
        transform.offset_y as i64,
    );

    Ok(Bitmap::from_rgba_image(canvas)?)
}

/// Draws `source` at native size onto a `width x height` canvas at
/// `(offset_x, offset_y)`.
///
/// # Errors
/// Returns [`CanvasError::Core`] for zero-sized canvases.
pub fn place_unscaled(
    source: &Bitmap,
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
    background: Rgba,
) -> Result<Bitmap, CanvasError> {
    let surface = SurfaceSize::new(width, height)?;
    composite_with(
        source,
        surface,
        background,
        Transform {
            draw_width: source.width(),
            draw_height: source.height(),
            offset_x,
            offset_y,
        },
    )
}

/// Brush used for freehand annotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushStyle {
    /// Stroke color including partial alpha.
    pub color: Rgba,
    /// Line width in surface pixels.
    pub width: f32,
}

impl Default for BrushStyle {
    fn default() -> Self {
        Self {
            color: DEFAULT_BRUSH_COLOR,
            width: DEFAULT_BRUSH_WIDTH,
        }
    }
}

/// One freehand stroke, pointer-down to pointer-up, in surface pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stroke {
    /// Polyline vertices in drawing order.
    pub points: Vec<(f32, f32)>,
}

impl Stroke {
    /// Starts a stroke at one point.
    pub fn begin(x: f32, y: f32) -> Self {
        Self {
            points: vec![(x, y)],
        }
    }

    /// Extends the stroke to a new point.
    pub fn line_to(&mut self, x: f32, y: f32) {
        self.points.push((x, y));
    }
}

/// Returns a copy of `base` with `strokes` drawn on top.
///
/// Each stroke covers every pixel whose center lies within half the brush
/// width of its polyline, and is blended source-over exactly once, so
/// self-overlapping segments of one stroke do not darken.
///
/// # Errors
/// Returns [`CanvasError::Core`] if the output bitmap cannot be built.
pub fn render_strokes(
    base: &Bitmap,
    strokes: &[Stroke],
    brush: BrushStyle,
) -> Result<Bitmap, CanvasError> {
    let (width, height) = base.dimensions();
    let mut rgba = base.as_rgba().to_vec();
    let mut coverage = vec![false; base.pixel_count()];
    let radius = (brush.width / 2.0).max(0.5);

    for stroke in strokes {
        let Some(&first) = stroke.points.first() else {
            continue;
        };
        coverage.fill(false);

        if stroke.points.len() == 1 {
            stamp_segment(&mut coverage, width, height, first, first, radius);
        }
        for pair in stroke.points.windows(2) {
            stamp_segment(&mut coverage, width, height, pair[0], pair[1], radius);
        }

        for (index, covered) in coverage.iter().enumerate() {
            if *covered {
                blend_source_over(&mut rgba[index * 4..index * 4 + 4], brush.color);
            }
        }
    }

    Ok(Bitmap::new(width, height, rgba)?)
}

fn stamp_segment(
    coverage: &mut [bool],
    width: u32,
    height: u32,
    start: (f32, f32),
    end: (f32, f32),
    radius: f32,
) {
    let min_x = (start.0.min(end.0) - radius).floor().max(0.0) as u32;
    let min_y = (start.1.min(end.1) - radius).floor().max(0.0) as u32;
    let max_x = ((start.0.max(end.0) + radius).ceil().max(0.0) as u32).min(width);
    let max_y = ((start.1.max(end.1) + radius).ceil().max(0.0) as u32).min(height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let center = (x as f32 + 0.5, y as f32 + 0.5);
            if distance_to_segment(center, start, end) <= radius {
                coverage[y as usize * width as usize + x as usize] = true;
            }
        }
    }
}

fn distance_to_segment(point: (f32, f32), start: (f32, f32), end: (f32, f32)) -> f32 {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length_sq = dx * dx + dy * dy;
    let t = if length_sq == 0.0 {
        0.0
    } else {
        (((point.0 - start.0) * dx + (point.1 - start.1) * dy) / length_sq).clamp(0.0, 1.0)
    };
    let nearest = (start.0 + t * dx, start.1 + t * dy);
    ((point.0 - nearest.0).powi(2) + (point.1 - nearest.1).powi(2)).sqrt()
}

fn blend_source_over(dst: &mut [u8], src: Rgba) {
    let src_alpha = src.alpha() as f32 / 255.0;
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
    if out_alpha <= 0.0 {
        dst.copy_from_slice(&Rgba::TRANSPARENT.0);
        return;
    }

    for channel in 0..3 {
        let value = (src.0[channel] as f32 * src_alpha
            + dst[channel] as f32 * dst_alpha * (1.0 - src_alpha))
            / out_alpha;
        dst[channel] = value.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Error type for surface and compositing operations.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// Surface has a zero dimension.
    #[error("drawing surface dimensions must be non-zero")]
    EmptySurface,
    /// Bitmap construction or conversion failed.
    #[error("bitmap error: {0}")]
    Core(#[from] CoreError),
}
