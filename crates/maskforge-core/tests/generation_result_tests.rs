//! Tests the tagged serialization of normalized generation results.

use maskforge_core::{ErrorKind, GenerationResult};

#[test]
fn generation_result_tests_serialize_with_type_tag() {
    let image = GenerationResult::Image {
        locator: "https://files.example.test/out.png".to_string(),
    };
    let encoded = serde_json::to_value(&image).expect("result should serialize");
    assert_eq!(encoded["type"], "image");
    assert_eq!(encoded["locator"], "https://files.example.test/out.png");

    let error = GenerationResult::error(ErrorKind::QuotaExceeded, "429");
    let encoded = serde_json::to_value(&error).expect("result should serialize");
    assert_eq!(encoded["type"], "error");
    assert_eq!(encoded["kind"], "quota_exceeded");
}
