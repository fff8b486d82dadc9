//! Tests compositing determinism and surface sizing.

use maskforge_canvas::{SurfaceGeometry, SurfaceSize, composite};
use maskforge_core::{Bitmap, Rgba};

fn gradient(width: u32, height: u32) -> Bitmap {
    let mut rgba = Vec::new();
    for y in 0..height {
        for x in 0..width {
            rgba.extend_from_slice(&[(x * 7 % 256) as u8, (y * 13 % 256) as u8, 90, 255]);
        }
    }
    Bitmap::new(width, height, rgba).expect("gradient should build")
}

#[test]
fn composite_tests_rerender_is_byte_identical() {
    let source = gradient(37, 23);
    let surface = SurfaceSize::new(120, 90).expect("surface should be valid");

    let (first, first_transform) =
        composite(&source, surface, Rgba::OPAQUE_WHITE).expect("composite should succeed");
    let (second, second_transform) =
        composite(&source, surface, Rgba::OPAQUE_WHITE).expect("composite should succeed");

    assert_eq!(first_transform, second_transform);
    assert_eq!(first, second);
}

#[test]
fn composite_tests_letterbox_bars_use_background() {
    let source = Bitmap::filled(200, 50, Rgba::new(0, 0, 255, 255)).expect("source should build");
    let surface = SurfaceSize::new(100, 100).expect("surface should be valid");

    let (layer, transform) =
        composite(&source, surface, Rgba::OPAQUE_WHITE).expect("composite should succeed");

    assert_eq!(transform.draw_width, 100);
    assert_eq!(transform.draw_height, 25);
    assert_eq!(layer.pixel(50, 0), Some(Rgba::OPAQUE_WHITE));
    assert_eq!(layer.pixel(50, 99), Some(Rgba::OPAQUE_WHITE));
    let inside = layer.pixel(50, 50).expect("pixel should exist");
    assert!(inside.0[0] <= 2 && inside.0[2] >= 253 && inside.alpha() == 255);
}

#[test]
fn composite_tests_surface_scales_with_pixel_density() {
    let geometry = SurfaceGeometry::for_display(640.7, 120.0, 2.0);
    assert_eq!(geometry.display_width, 640);
    assert_eq!(geometry.display_height, 200);
    assert_eq!(geometry.surface.width, 1280);
    assert_eq!(geometry.surface.height, 400);
    assert_eq!(geometry.to_surface_point(10.0, 20.0), (20.0, 40.0));

    let fallback = SurfaceGeometry::fallback(f64::NAN);
    assert_eq!(fallback.surface.width, 800);
    assert_eq!(fallback.surface.height, 600);
}
