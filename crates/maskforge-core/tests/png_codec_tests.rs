//! Tests PNG transport encoding of bitmaps.

use maskforge_core::{Bitmap, PNG_MEDIA_TYPE, Rgba, sniff_media_type};

#[test]
fn png_codec_tests_preserve_exact_pixels_and_alpha() {
    let mut rgba = Vec::new();
    rgba.extend_from_slice(&[255, 0, 0, 128]);
    rgba.extend_from_slice(&Rgba::TRANSPARENT.0);
    rgba.extend_from_slice(&Rgba::OPAQUE_WHITE.0);
    rgba.extend_from_slice(&[1, 2, 3, 255]);
    let bitmap = Bitmap::new(2, 2, rgba).expect("bitmap should be valid");

    let part = bitmap.to_png_part().expect("png encoding should succeed");
    assert_eq!(part.mime_type, PNG_MEDIA_TYPE);
    assert_eq!(sniff_media_type(&part.bytes), Some("image/png"));

    let decoded = Bitmap::decode(&part.bytes).expect("png should decode");
    assert_eq!(decoded, bitmap);
}

#[test]
fn png_codec_tests_reject_non_image_bytes() {
    assert!(Bitmap::decode(b"definitely not an image").is_err());
    assert_eq!(sniff_media_type(b"plain text"), None);
}

#[test]
fn png_codec_tests_undecodable_formats_are_not_sniffed() {
    let gif_header = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00";
    assert_eq!(sniff_media_type(gif_header), None);
    assert!(maskforge_core::BinaryImage::sniffed(gif_header.to_vec()).is_err());
}
