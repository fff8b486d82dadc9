//! Benchmark smoke test for the composite, annotate, derive and expand loop.

use std::time::Instant;

use maskforge_canvas::{BrushStyle, Stroke, SurfaceSize, composite, render_strokes};
use maskforge_contract::data_uri;
use maskforge_core::{Bitmap, Rgba};
use maskforge_mask::{build_expansion, derive_mask};

#[test]
fn benchmark_mask_pipeline_smoke_prints_latency() {
    let source =
        Bitmap::filled(640, 480, Rgba::new(40, 90, 160, 255)).expect("source should build");
    let surface = SurfaceSize::new(800, 600).expect("surface should be valid");

    let mut stroke = Stroke::begin(100.0, 100.0);
    for step in 1..40 {
        stroke.line_to(100.0 + step as f32 * 12.0, 100.0 + (step % 7) as f32 * 20.0);
    }

    let start = Instant::now();
    let mut edited_total = 0usize;
    let mut locator_bytes = 0usize;

    for _ in 0..5 {
        let (clean, _) =
            composite(&source, surface, Rgba::OPAQUE_WHITE).expect("composite should succeed");
        let annotated =
            render_strokes(&clean, std::slice::from_ref(&stroke), BrushStyle::default())
                .expect("strokes should render");
        let mask = derive_mask(&clean, &annotated).expect("mask should derive");
        edited_total += mask.edited_pixel_count();

        let expansion = build_expansion(&source).expect("expansion should build");
        let part = expansion
            .preserve_mask
            .to_png_part()
            .expect("mask should encode");
        locator_bytes += data_uri(&part).len();
    }

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_mask_pipeline_elapsed_ms={elapsed_ms}");
    println!("benchmark_edited_pixels_total={edited_total}");
    println!("benchmark_locator_bytes_total={locator_bytes}");

    assert!(edited_total > 0);
    // Lightweight guardrail; unoptimized builds are much slower than release.
    assert!(
        elapsed_ms < 30_000,
        "mask pipeline smoke benchmark should stay bounded"
    );
}
